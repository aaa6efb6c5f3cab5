//! Side-aware proximity clustering of liquidation events into zones.

use crate::logging::{log, obj, Domain, Level};
use crate::types::{InferredLiquidationEvent, LiqSide, QualityLabel, Zone};
use serde_json::json;

/// `|a - b| <= pct * min(a, b)`
pub fn within_pct(a: f64, b: f64, pct: f64) -> bool {
    (a - b).abs() <= pct * a.min(b)
}

/// Running aggregates of one side's events around a price.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAccumulator {
    pub side: LiqSide,
    pub usd_sum: f64,
    pub price_usd_sum: f64,
    pub price_sum: f64,
    pub count: u32,
    pub price_min: f64,
    pub price_max: f64,
    pub first_seen: u64,
    pub last_updated: u64,
}

impl ZoneAccumulator {
    pub fn new(event: &InferredLiquidationEvent) -> Self {
        Self {
            side: event.side,
            usd_sum: event.usd_value,
            price_usd_sum: event.price * event.usd_value,
            price_sum: event.price,
            count: 1,
            price_min: event.price,
            price_max: event.price,
            first_seen: event.ts_ms,
            last_updated: event.ts_ms,
        }
    }

    pub fn add(&mut self, event: &InferredLiquidationEvent) {
        self.usd_sum += event.usd_value;
        self.price_usd_sum += event.price * event.usd_value;
        self.price_sum += event.price;
        self.count += 1;
        self.price_min = self.price_min.min(event.price);
        self.price_max = self.price_max.max(event.price);
        self.first_seen = self.first_seen.min(event.ts_ms);
        self.last_updated = self.last_updated.max(event.ts_ms);
    }

    pub fn merge(&mut self, other: &ZoneAccumulator) {
        self.usd_sum += other.usd_sum;
        self.price_usd_sum += other.price_usd_sum;
        self.price_sum += other.price_sum;
        self.count += other.count;
        self.price_min = self.price_min.min(other.price_min);
        self.price_max = self.price_max.max(other.price_max);
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_updated = self.last_updated.max(other.last_updated);
    }

    /// Extra usd credited to an event already counted at `price`.
    pub fn boost(&mut self, price: f64, added_usd: f64) {
        self.usd_sum += added_usd;
        self.price_usd_sum += price * added_usd;
    }

    /// Usd-weighted mean price; simple mean when no usd was recorded.
    pub fn mean(&self) -> f64 {
        if self.usd_sum > 0.0 {
            (self.price_usd_sum / self.usd_sum).clamp(self.price_min, self.price_max)
        } else if self.count > 0 {
            self.price_sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Distance from `price` to the `[min, max]` range; zero inside it.
    pub fn edge_distance(&self, price: f64) -> f64 {
        if price < self.price_min {
            self.price_min - price
        } else if price > self.price_max {
            price - self.price_max
        } else {
            0.0
        }
    }

    /// Unscored zone; the band collapses onto the mean until scored.
    pub fn to_zone(&self) -> Zone {
        let mean = self.mean();
        Zone {
            price_mean: mean,
            price_min: self.price_min,
            price_max: self.price_max,
            entry_low: mean,
            entry_high: mean,
            band: 0.0,
            total_usd: self.usd_sum,
            count: self.count,
            strength: 0.0,
            dominant_side: self.side,
            quality_score: 0.0,
            quality_label: QualityLabel::Weak,
            touch_count: 0,
            first_seen: self.first_seen,
            last_updated: self.last_updated,
            timeframe: None,
            alignment_score: None,
            prediction: None,
        }
    }
}

/// Cluster events into unscored zones, ascending by price.
pub fn cluster(events: &[InferredLiquidationEvent], pct_merge: f64) -> Vec<Zone> {
    let groups = cluster_groups(events, pct_merge);
    let mut zones: Vec<Zone> = groups.iter().map(ZoneAccumulator::to_zone).collect();
    zones.sort_by(|a, b| {
        a.price_mean
            .total_cmp(&b.price_mean)
            .then(a.dominant_side.cmp(&b.dominant_side))
    });
    log(
        Level::Debug,
        Domain::Cluster,
        "clustered",
        obj(&[("events", json!(events.len())), ("zones", json!(zones.len()))]),
    );
    zones
}

/// Accumulators per side after all three passes.
pub fn cluster_groups(events: &[InferredLiquidationEvent], pct_merge: f64) -> Vec<ZoneAccumulator> {
    let mut out = Vec::new();
    for side in [LiqSide::Long, LiqSide::Short] {
        let mut side_events: Vec<&InferredLiquidationEvent> =
            events.iter().filter(|e| e.side == side).collect();
        if side_events.is_empty() {
            continue;
        }
        side_events.sort_by(|a, b| a.price.total_cmp(&b.price));

        let groups = greedy_groups(&side_events, pct_merge);
        let groups = merge_adjacent(groups, pct_merge);
        let groups = fold_singletons(groups, pct_merge);
        out.extend(merge_adjacent(groups, pct_merge));
    }
    out
}

/// Pass 1: consecutive price-sorted events join the running group while
/// within tolerance of its mean.
fn greedy_groups(sorted: &[&InferredLiquidationEvent], pct: f64) -> Vec<ZoneAccumulator> {
    let mut groups: Vec<ZoneAccumulator> = Vec::new();
    for e in sorted {
        match groups.last_mut() {
            Some(g) if within_pct(e.price, g.mean(), pct) => g.add(e),
            _ => groups.push(ZoneAccumulator::new(e)),
        }
    }
    groups
}

/// Pass 2: merge neighbouring groups with close means until nothing moves.
fn merge_adjacent(mut groups: Vec<ZoneAccumulator>, pct: f64) -> Vec<ZoneAccumulator> {
    loop {
        let before = groups.len();
        let mut merged: Vec<ZoneAccumulator> = Vec::with_capacity(before);
        for g in groups {
            match merged.last_mut() {
                Some(last) if within_pct(last.mean(), g.mean(), pct) => last.merge(&g),
                _ => merged.push(g),
            }
        }
        groups = merged;
        if groups.len() == before {
            return groups;
        }
    }
}

/// Pass 3: single-event groups join the nearest neighbour whose range edge
/// is within tolerance; otherwise they stay as standalone zones.
fn fold_singletons(mut groups: Vec<ZoneAccumulator>, pct: f64) -> Vec<ZoneAccumulator> {
    let mut i = 0;
    while i < groups.len() {
        if groups[i].count != 1 || groups.len() < 2 {
            i += 1;
            continue;
        }
        let price = groups[i].mean();
        let candidates = [i.checked_sub(1), (i + 1 < groups.len()).then_some(i + 1)];
        let best = candidates
            .into_iter()
            .flatten()
            .filter(|&j| {
                let d = groups[j].edge_distance(price);
                let edge = if price < groups[j].price_min { groups[j].price_min } else { groups[j].price_max };
                d == 0.0 || within_pct(price, edge, pct)
            })
            .min_by(|&a, &b| {
                groups[a]
                    .edge_distance(price)
                    .total_cmp(&groups[b].edge_distance(price))
            });
        match best {
            Some(j) => {
                let single = groups.remove(i);
                let j = if j > i { j - 1 } else { j };
                groups[j].merge(&single);
                // A fold can pull the left neighbour closer; recheck from it.
                i = j;
            }
            None => i += 1,
        }
    }
    groups
}
