//! Predictor port: zone hold/break probabilities from an external model.
//!
//! The core never trains or persists a model. It derives `ZoneFeatures`,
//! asks a `ZonePredictor` for probabilities and attaches them to zones.
//! Observed outcomes are collected in an `OutcomeLedger` for evaluation.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::features::{FeatureContext, ZoneFeatures};
use crate::logging::log_predictor_error;
use crate::types::{LiqSide, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictedOutcome {
    Hold,
    Break,
}

impl PredictedOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedOutcome::Hold => "hold",
            PredictedOutcome::Break => "break",
        }
    }
}

/// Raw answer from a predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub hold_probability: f64,
    pub break_probability: f64,
    pub confidence: f64,
}

/// Prediction as stored on a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZonePrediction {
    pub hold_probability: f64,
    pub break_probability: f64,
    pub confidence: f64,
    pub outcome: PredictedOutcome,
}

impl TryFrom<Prediction> for ZonePrediction {
    type Error = String;

    fn try_from(p: Prediction) -> Result<Self, Self::Error> {
        let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !unit(p.hold_probability) || !unit(p.break_probability) || !unit(p.confidence) {
            return Err(format!(
                "probabilities out of range: hold={} break={} confidence={}",
                p.hold_probability, p.break_probability, p.confidence
            ));
        }
        let outcome = if p.hold_probability >= p.break_probability {
            PredictedOutcome::Hold
        } else {
            PredictedOutcome::Break
        };
        Ok(Self {
            hold_probability: p.hold_probability,
            break_probability: p.break_probability,
            confidence: p.confidence,
            outcome,
        })
    }
}

/// Model behind the port. Implementations must be callable from any thread.
pub trait ZonePredictor: Send + Sync {
    fn predict(&self, features: &ZoneFeatures) -> Result<Prediction, String>;

    fn name(&self) -> &str;
}

/// Attach predictions to `zones`. A failing or out-of-range prediction
/// leaves that zone unenriched and is logged. Returns how many zones were
/// enriched.
pub fn enrich_zones(zones: &mut [Zone], predictor: &dyn ZonePredictor, ctx: &FeatureContext) -> usize {
    let mut enriched = 0;
    for zone in zones.iter_mut() {
        let features = ZoneFeatures::from_zone(zone, ctx);
        match predictor.predict(&features).and_then(ZonePrediction::try_from) {
            Ok(p) => {
                zone.prediction = Some(p);
                enriched += 1;
            }
            Err(err) => log_predictor_error(predictor.name(), zone.price_mean, &err),
        }
    }
    enriched
}

/// Predictor attached to a pipeline or stream engine. Cloning shares the
/// same model.
#[derive(Clone)]
pub struct SharedPredictor(Arc<dyn ZonePredictor>);

impl SharedPredictor {
    pub fn new(predictor: Arc<dyn ZonePredictor>) -> Self {
        Self(predictor)
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn enrich(&self, zones: &mut [Zone], ctx: &FeatureContext) -> usize {
        enrich_zones(zones, self.0.as_ref(), ctx)
    }
}

impl fmt::Debug for SharedPredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedPredictor").field(&self.name()).finish()
    }
}

// =============================================================================
// Outcome ledger
// =============================================================================

/// One observed zone outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRecord {
    pub price_mean: f64,
    pub side: LiqSide,
    pub outcome: PredictedOutcome,
    pub first_seen: u64,
    pub observed_at: u64,
}

impl OutcomeRecord {
    pub fn from_zone(zone: &Zone, outcome: PredictedOutcome, observed_at: u64) -> Self {
        Self {
            price_mean: zone.price_mean,
            side: zone.dominant_side,
            outcome,
            first_seen: zone.first_seen,
            observed_at,
        }
    }
}

/// Evaluation of recorded outcomes. Holds count as wins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMetrics {
    pub n_zones: usize,
    /// Percent, one decimal.
    pub win_rate: f64,
    /// Mean lifetime of broken zones.
    pub avg_hold_hours: f64,
    /// Win = +1, loss = -1.
    pub expectancy: f64,
    pub sqn_score: f64,
    pub interpretation: &'static str,
}

/// Bounded history of zone outcomes; oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct OutcomeLedger {
    capacity: usize,
    records: VecDeque<OutcomeRecord>,
}

impl Default for OutcomeLedger {
    fn default() -> Self {
        Self::new(Self::CAPACITY)
    }
}

impl OutcomeLedger {
    pub const CAPACITY: usize = 500;
    pub const MIN_RECORDS: usize = 10;

    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), records: VecDeque::new() }
    }

    pub fn record(&mut self, record: OutcomeRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &OutcomeRecord> {
        self.records.iter()
    }

    /// `None` until at least `MIN_RECORDS` outcomes are recorded.
    pub fn metrics(&self) -> Option<ZoneMetrics> {
        let n = self.records.len();
        if n < Self::MIN_RECORDS {
            return None;
        }
        let wins: Vec<f64> = self
            .records
            .iter()
            .map(|r| if r.outcome == PredictedOutcome::Hold { 1.0 } else { 0.0 })
            .collect();
        let mean = wins.iter().sum::<f64>() / n as f64;
        let var = wins.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / n as f64;
        let sqn = mean / (var.sqrt() + 1e-6) * (n as f64).sqrt();

        let hold_hours: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.outcome == PredictedOutcome::Break)
            .map(|r| r.observed_at.saturating_sub(r.first_seen) as f64 / 3_600_000.0)
            .collect();
        let avg_hold_hours = if hold_hours.is_empty() {
            0.0
        } else {
            hold_hours.iter().sum::<f64>() / hold_hours.len() as f64
        };

        Some(ZoneMetrics {
            n_zones: n,
            win_rate: round_to(mean * 100.0, 1),
            avg_hold_hours: round_to(avg_hold_hours, 2),
            expectancy: round_to(2.0 * mean - 1.0, 3),
            sqn_score: round_to(sqn, 2),
            interpretation: interpret_sqn(sqn),
        })
    }
}

fn interpret_sqn(sqn: f64) -> &'static str {
    if sqn > 2.5 {
        "excellent"
    } else if sqn > 1.5 {
        "good"
    } else if sqn > 0.5 {
        "fair"
    } else {
        "poor"
    }
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let f = 10f64.powi(decimals);
    (v * f).round() / f
}
