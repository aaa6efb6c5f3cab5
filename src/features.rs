use std::collections::VecDeque;

use crate::types::Zone;

/// Fixed-window running mean/variance.
#[derive(Debug, Clone)]
pub struct RollingStats {
    window: usize,
    buf: VecDeque<f64>,
    sum: f64,
    sumsq: f64,
}

impl RollingStats {
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), buf: VecDeque::new(), sum: 0.0, sumsq: 0.0 }
    }

    pub fn push(&mut self, x: f64) {
        self.buf.push_back(x);
        self.sum += x;
        self.sumsq += x * x;
        if self.buf.len() > self.window {
            if let Some(old) = self.buf.pop_front() {
                self.sum -= old;
                self.sumsq -= old * old;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.buf.is_empty() { 0.0 } else { self.sum / self.buf.len() as f64 }
    }

    pub fn variance(&self) -> f64 {
        let n = self.buf.len() as f64;
        if n < 2.0 { 0.0 } else { ((self.sumsq - (self.sum * self.sum) / n) / (n - 1.0)).max(0.0) }
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Market state the zone features are measured against.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext {
    pub current_price: f64,
    pub now_ms: u64,
    /// Prevailing funding rate, 0.0 when unknown.
    pub funding_rate: f64,
}

/// Predictor inputs derived from a scored zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneFeatures {
    /// ln(1 + total_usd)
    pub volume_log: f64,
    /// Hours since the last reinforcing event.
    pub recency_hours: f64,
    /// Event count.
    pub density: f64,
    /// 1 / (spread_pct + 0.01); larger is tighter.
    pub tightness: f64,
    pub quality_score: f64,
    /// 0 when the zone was not produced by a multi-timeframe run.
    pub alignment_score: f64,
    /// Hours since the zone first appeared.
    pub zone_age_hours: f64,
    /// |price_mean - current_price| / current_price, in percent.
    pub price_distance_pct: f64,
    /// Candle touches, capped at 10.
    pub touch_count: f64,
    /// 1.0 when |funding| exceeds the extreme threshold.
    pub funding_extreme: f64,
}

impl ZoneFeatures {
    pub const TOUCH_CAP: u32 = 10;
    pub const FUNDING_EXTREME: f64 = 0.001;

    pub fn from_zone(zone: &Zone, ctx: &FeatureContext) -> Self {
        let hours = |ts: u64| ctx.now_ms.saturating_sub(ts) as f64 / 3_600_000.0;
        let price_distance_pct = if ctx.current_price > 0.0 {
            (zone.price_mean - ctx.current_price).abs() / ctx.current_price * 100.0
        } else {
            0.0
        };
        Self {
            volume_log: zone.total_usd.max(0.0).ln_1p(),
            recency_hours: hours(zone.last_updated),
            density: zone.count as f64,
            tightness: 1.0 / (zone.spread_pct() + 0.01),
            quality_score: zone.quality_score,
            alignment_score: zone.alignment_score.unwrap_or(0.0),
            zone_age_hours: hours(zone.first_seen),
            price_distance_pct,
            touch_count: zone.touch_count.min(Self::TOUCH_CAP) as f64,
            funding_extreme: if ctx.funding_rate.abs() > Self::FUNDING_EXTREME { 1.0 } else { 0.0 },
        }
    }

    /// Feature vector in a fixed order, for model-backed predictors.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.volume_log,
            self.recency_hours,
            self.density,
            self.tightness,
            self.quality_score,
            self.alignment_score,
            self.zone_age_hours,
            self.price_distance_pct,
            self.touch_count,
            self.funding_extreme,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LiqSide, QualityLabel};

    fn zone_at(price: f64) -> Zone {
        Zone {
            price_mean: price,
            price_min: price * 0.999,
            price_max: price * 1.001,
            entry_low: price * 0.998,
            entry_high: price * 1.002,
            band: price * 0.002,
            total_usd: 1_000_000.0,
            count: 12,
            strength: 0.5,
            dominant_side: LiqSide::Long,
            quality_score: 55.0,
            quality_label: QualityLabel::Medium,
            touch_count: 14,
            first_seen: 0,
            last_updated: 3_600_000,
            timeframe: None,
            alignment_score: None,
            prediction: None,
        }
    }

    #[test]
    fn test_rolling_stats_window() {
        let mut s = RollingStats::new(3);
        for x in [1.0, 2.0, 3.0, 4.0] {
            s.push(x);
        }
        assert_eq!(s.len(), 3);
        assert!((s.mean() - 3.0).abs() < 1e-12);
        assert!((s.stddev() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zone_features() {
        let zone = zone_at(100.0);
        let ctx = FeatureContext { current_price: 110.0, now_ms: 7_200_000, funding_rate: -0.002 };
        let f = ZoneFeatures::from_zone(&zone, &ctx);
        assert!((f.recency_hours - 1.0).abs() < 1e-12);
        assert!((f.zone_age_hours - 2.0).abs() < 1e-12);
        assert_eq!(f.touch_count, 10.0);
        assert_eq!(f.funding_extreme, 1.0);
        assert_eq!(f.alignment_score, 0.0);
        assert!((f.price_distance_pct - 10.0 / 110.0 * 100.0).abs() < 1e-9);
        assert_eq!(f.to_vec().len(), 10);
    }
}
