//! Incremental zone maintenance.
//!
//! Records are applied one at a time in timestamp order, so splitting a
//! stream into batches does not change the resulting zones. Lifecycle
//! callbacks are collected while a batch is applied and fired at the end
//! of `update_incremental`: formed, then updated, then broken.

pub mod lifecycle;
pub mod observers;

pub use lifecycle::{BreakReason, ZoneState};
pub use observers::{ObserverResult, Observers};

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::cluster::within_pct;
use crate::config::ZoneConfig;
use crate::data::{IngestStats, RecordSource};
use crate::error::Result;
use crate::indicators::Atr;
use crate::logging::{log, log_skipped_record, log_zone_transition, obj, v_str, Domain, Level};
use crate::predictor::{OutcomeLedger, OutcomeRecord, PredictedOutcome, SharedPredictor, ZonePredictor};
use crate::scoring::ZoneScorer;
use crate::signals::{Extracted, OiConfirmation, SignalExtractor};
use crate::types::{sorted_by_time, Candle, InferredLiquidationEvent, MarketRecord, Zone};

use lifecycle::{apply_event, LifecycleEvent, TrackedZone, Transition};

/// Transitions collected while one batch is applied.
#[derive(Debug, Default)]
struct BatchLog {
    formed: Vec<u64>,
    updated: Vec<u64>,
    broken: Vec<(u64, Zone)>,
}

#[derive(Debug)]
pub struct StreamEngine {
    config: ZoneConfig,
    scorer: ZoneScorer,
    extractor: SignalExtractor,
    atr: Atr,
    zones: BTreeMap<u64, TrackedZone>,
    /// Events still inside the OI confirmation window, with their zone.
    recent: VecDeque<(u64, InferredLiquidationEvent)>,
    next_id: u64,
    clock: Option<u64>,
    observers: Observers,
    ledger: OutcomeLedger,
    predictor: Option<SharedPredictor>,
    batch: BatchLog,
}

impl StreamEngine {
    pub fn new(config: ZoneConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scorer: ZoneScorer::new(&config),
            extractor: SignalExtractor::from_config(&config),
            atr: Atr::new(config.atr_period),
            zones: BTreeMap::new(),
            recent: VecDeque::new(),
            next_id: 1,
            clock: None,
            observers: Observers::default(),
            ledger: OutcomeLedger::default(),
            predictor: None,
            batch: BatchLog::default(),
            config,
        })
    }

    pub fn on_zone_formed<F>(&mut self, f: F)
    where
        F: FnMut(&Zone) -> ObserverResult + Send + 'static,
    {
        self.observers.add_formed(Box::new(f));
    }

    /// `f(new, old)`
    pub fn on_zone_updated<F>(&mut self, f: F)
    where
        F: FnMut(&Zone, &Zone) -> ObserverResult + Send + 'static,
    {
        self.observers.add_updated(Box::new(f));
    }

    pub fn on_zone_broken<F>(&mut self, f: F)
    where
        F: FnMut(&Zone) -> ObserverResult + Send + 'static,
    {
        self.observers.add_broken(Box::new(f));
    }

    /// Attach hold/break predictions to the zones returned from now on.
    /// Callback snapshots are not enriched.
    pub fn set_predictor(&mut self, predictor: Arc<dyn ZonePredictor>) {
        self.predictor = Some(SharedPredictor::new(predictor));
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn stats(&self) -> &IngestStats {
        self.extractor.stats()
    }

    pub fn ledger(&self) -> &OutcomeLedger {
        &self.ledger
    }

    pub fn observer_errors(&self) -> u64 {
        self.observers.errors()
    }

    /// Tracked zones including those still forming.
    pub fn tracked(&self) -> usize {
        self.zones.len()
    }

    /// Latest record timestamp seen.
    pub fn clock(&self) -> Option<u64> {
        self.clock
    }

    /// Apply `new_records` and return the active zones, scored, filtered
    /// and strongest first.
    pub fn update_incremental(&mut self, new_records: &[MarketRecord]) -> Vec<Zone> {
        let before = self.render_active();
        self.batch = BatchLog::default();
        for record in sorted_by_time(new_records) {
            self.ingest(record);
        }
        let after = self.render_active();
        self.fire_callbacks(&before, &after);
        self.publish(after.into_values().collect())
    }

    /// Current active zones without applying anything.
    pub fn zones(&self) -> Vec<Zone> {
        self.publish(self.render_active().into_values().collect())
    }

    /// Feed every batch of `source` until it is exhausted.
    pub fn drain(&mut self, source: &mut dyn RecordSource) -> std::result::Result<Vec<Zone>, String> {
        loop {
            let batch = source.next_batch()?;
            if batch.is_empty() {
                return Ok(self.zones());
            }
            self.update_incremental(&batch);
        }
    }

    fn ingest(&mut self, record: &MarketRecord) {
        let ts = record.ts_ms();
        self.clock = Some(self.clock.map_or(ts, |c| c.max(ts)));
        self.expire();

        match self.extractor.push(record) {
            Extracted::Event(e) => self.on_event(e),
            Extracted::OiDrop(c) => self.on_oi_drop(c),
            Extracted::Nothing => {}
        }
        if let MarketRecord::Candle(c) = record {
            if self.extractor.tracks_candle(c) {
                self.on_candle(c);
            }
        }
        self.prune_recent();
    }

    fn on_event(&mut self, event: InferredLiquidationEvent) {
        let pct = self.config.pct_merge;
        let target = self
            .zones
            .values()
            .filter(|z| z.side() == event.side && within_pct(event.price, z.mean(), pct))
            .min_by(|a, b| {
                let da = (a.mean() - event.price).abs();
                let db = (b.mean() - event.price).abs();
                da.total_cmp(&db).then(a.id().cmp(&b.id()))
            })
            .map(TrackedZone::id);

        let id = match target {
            Some(id) => {
                if let Some(z) = self.zones.get_mut(&id) {
                    z.acc.add(&event);
                }
                self.reinforce(id);
                self.settle(id)
            }
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.zones.insert(id, TrackedZone::new(id, &event, pct));
                self.reinforce(id);
                id
            }
        };
        self.recent.push_back((id, event));
    }

    /// Boost retained events inside the confirmation window and their zones.
    fn on_oi_drop(&mut self, confirmation: OiConfirmation) {
        let mut touched = BTreeSet::new();
        for (id, event) in self.recent.iter_mut() {
            let added = confirmation.apply(event);
            if added > 0.0 {
                if let Some(z) = self.zones.get_mut(id) {
                    z.acc.boost(event.price, added);
                    touched.insert(*id);
                }
            }
        }
        for id in touched {
            self.mark_updated(id);
            self.settle(id);
        }
    }

    fn on_candle(&mut self, candle: &Candle) {
        if let Err(reason) = self.atr.update_candle(candle) {
            log_skipped_record(Domain::Stream, "candle", reason, candle.ts_ms);
            return;
        }
        let atr = self.current_atr();
        let ids: Vec<u64> = self
            .zones
            .values()
            .filter(|z| z.state == ZoneState::Active)
            .map(TrackedZone::id)
            .collect();
        for id in ids {
            let Some(z) = self.zones.get_mut(&id) else {
                continue;
            };
            let mean = z.mean();
            let band = match atr {
                Some(a) => a * self.config.zone_vol_mult,
                None => mean * self.config.pct_merge,
            };
            let event = LifecycleEvent::Close {
                close: candle.close,
                entry_low: mean - band,
                entry_high: mean + band,
                confirm_closes: self.config.break_confirm_closes,
                touch_tolerance: self.config.touch_tolerance,
            };
            match apply_event(z, event) {
                Ok(Transition::Broken(reason)) => self.break_zone(id, reason),
                Ok(Transition::Touched) => self.mark_updated(id),
                Ok(Transition::Held) => {
                    if let Some(zone) = self.render_active().remove(&id) {
                        self.ledger
                            .record(OutcomeRecord::from_zone(&zone, PredictedOutcome::Hold, candle.ts_ms));
                    }
                }
                Ok(_) => {}
                Err(err) => log(Level::Warn, Domain::Stream, "transition_error", obj(&[("msg", v_str(&err.msg))])),
            }
        }
    }

    /// Age out zones that saw no event for a full window.
    fn expire(&mut self) {
        let Some(clock) = self.clock else {
            return;
        };
        if !self.config.age_out {
            return;
        }
        let window = self.config.window_ms();
        let stale: Vec<u64> = self
            .zones
            .values()
            .filter(|z| clock.saturating_sub(z.acc.last_updated) > window)
            .map(TrackedZone::id)
            .collect();
        for id in stale {
            let Some(z) = self.zones.get_mut(&id) else {
                continue;
            };
            match apply_event(z, LifecycleEvent::Expire) {
                Ok(Transition::Dropped) => {
                    self.zones.remove(&id);
                }
                Ok(Transition::Broken(reason)) => self.break_zone(id, reason),
                Ok(_) => {}
                Err(err) => log(Level::Warn, Domain::Stream, "transition_error", obj(&[("msg", v_str(&err.msg))])),
            }
        }
    }

    fn reinforce(&mut self, id: u64) {
        let min_events = self.config.min_zone_events;
        let Some(z) = self.zones.get_mut(&id) else {
            return;
        };
        match apply_event(z, LifecycleEvent::Reinforce { min_events }) {
            Ok(Transition::Formed) => {
                log_zone_transition("zone_formed", id, z.side().as_str(), z.mean(), z.acc.usd_sum);
                self.batch.formed.push(id);
            }
            Ok(_) => self.mark_updated(id),
            Err(err) => log(Level::Warn, Domain::Stream, "transition_error", obj(&[("msg", v_str(&err.msg))])),
        }
    }

    /// Merge zones whose means drifted within tolerance of each other. The
    /// older zone survives and keeps its identity. Returns the surviving id.
    fn settle(&mut self, mut id: u64) -> u64 {
        let pct = self.config.pct_merge;
        loop {
            let Some(z) = self.zones.get(&id) else {
                return id;
            };
            let (side, mean) = (z.side(), z.mean());
            let other = self
                .zones
                .values()
                .filter(|o| o.id() != id && o.side() == side && within_pct(mean, o.mean(), pct))
                .min_by(|a, b| {
                    let da = (a.mean() - mean).abs();
                    let db = (b.mean() - mean).abs();
                    da.total_cmp(&db).then(a.id().cmp(&b.id()))
                })
                .map(TrackedZone::id);

            let Some(other) = other else {
                if let Some(z) = self.zones.get_mut(&id) {
                    if z.identity.rekey(mean, pct) {
                        log(
                            Level::Trace,
                            Domain::Stream,
                            "zone_rekeyed",
                            obj(&[("zone_id", json!(id)), ("bucket", json!(z.identity.bucket))]),
                        );
                    }
                }
                return id;
            };

            let (survivor, absorbed) = if other < id { (other, id) } else { (id, other) };
            let Some(young) = self.zones.remove(&absorbed) else {
                return id;
            };
            if let Some(s) = self.zones.get_mut(&survivor) {
                s.acc.merge(&young.acc);
                s.touch_count = s.touch_count.max(young.touch_count);
            }
            for (zid, _) in self.recent.iter_mut() {
                if *zid == absorbed {
                    *zid = survivor;
                }
            }
            self.batch.formed.retain(|z| *z != absorbed);
            self.batch.updated.retain(|z| *z != absorbed);
            log(
                Level::Debug,
                Domain::Stream,
                "zone_absorbed",
                obj(&[("zone_id", json!(survivor)), ("absorbed", json!(absorbed))]),
            );
            self.reinforce(survivor);
            id = survivor;
        }
    }

    fn mark_updated(&mut self, id: u64) {
        let active = self.zones.get(&id).is_some_and(|z| z.state == ZoneState::Active);
        if active && !self.batch.formed.contains(&id) && !self.batch.updated.contains(&id) {
            self.batch.updated.push(id);
        }
    }

    fn break_zone(&mut self, id: u64, reason: BreakReason) {
        let snapshot = self.render_active().remove(&id);
        let Some(tracked) = self.zones.remove(&id) else {
            return;
        };
        log_zone_transition("zone_broken", id, tracked.side().as_str(), tracked.mean(), tracked.acc.usd_sum);
        log(
            Level::Debug,
            Domain::Stream,
            "break_reason",
            obj(&[("zone_id", json!(id)), ("reason", v_str(reason.as_str()))]),
        );
        self.batch.updated.retain(|z| *z != id);
        let zone = snapshot.unwrap_or_else(|| tracked.to_zone());
        if reason == BreakReason::PriceBreak {
            let at = self.clock.unwrap_or(zone.last_updated);
            self.ledger.record(OutcomeRecord::from_zone(&zone, PredictedOutcome::Break, at));
        }
        self.batch.broken.push((id, zone));
    }

    fn prune_recent(&mut self) {
        let Some(clock) = self.clock else {
            return;
        };
        let horizon = clock.saturating_sub(self.config.thresholds.oi_confirm_window_ms);
        while self.recent.front().is_some_and(|(_, e)| e.ts_ms < horizon) {
            self.recent.pop_front();
        }
    }

    fn current_atr(&self) -> Option<f64> {
        self.atr.get().filter(|v| v.is_finite() && *v > 0.0)
    }

    fn publish(&self, zones: Vec<Zone>) -> Vec<Zone> {
        let mut zones = self.scorer.filter_and_rank(zones);
        if let (Some(predictor), Some(now)) = (&self.predictor, self.clock) {
            predictor.enrich(&mut zones, &self.extractor.feature_context(now));
        }
        zones
    }

    /// Scored snapshots of every announced zone, keyed by id.
    fn render_active(&self) -> BTreeMap<u64, Zone> {
        let raw: Vec<(u64, Zone)> = self
            .zones
            .values()
            .filter(|z| z.state != ZoneState::Forming)
            .map(|z| (z.id(), z.to_zone()))
            .collect();
        if raw.is_empty() {
            return BTreeMap::new();
        }
        let plain: Vec<Zone> = raw.iter().map(|(_, z)| z.clone()).collect();
        let ctx = self.scorer.context(&plain, self.current_atr(), self.clock.unwrap_or(0));
        raw.into_iter().map(|(id, z)| (id, self.scorer.score(&z, &ctx))).collect()
    }

    fn fire_callbacks(&mut self, before: &BTreeMap<u64, Zone>, after: &BTreeMap<u64, Zone>) {
        let batch = std::mem::take(&mut self.batch);
        let broken: HashMap<u64, &Zone> = batch.broken.iter().map(|(id, z)| (*id, z)).collect();

        for id in &batch.formed {
            if let Some(zone) = after.get(id).or_else(|| broken.get(id).copied()) {
                self.observers.zone_formed(zone);
            }
        }
        for id in &batch.updated {
            if let (Some(new), Some(old)) = (after.get(id), before.get(id)) {
                self.observers.zone_updated(new, old);
            }
        }
        for (_, zone) in &batch.broken {
            self.observers.zone_broken(zone);
        }
    }
}
