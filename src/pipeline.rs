//! Batch facade: extract -> window -> cluster -> score -> filter.

use std::sync::Arc;

use crate::cluster::cluster;
use crate::config::ZoneConfig;
use crate::data::IngestStats;
use crate::error::Result;
use crate::features::FeatureContext;
use crate::logging::log_pipeline_summary;
use crate::predictor::{SharedPredictor, ZonePredictor};
use crate::scoring::ZoneScorer;
use crate::signals::{run_extractor, SignalExtractor};
use crate::types::{MarketRecord, Zone};

/// Zones plus what happened to the input on the way.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub zones: Vec<Zone>,
    pub stats: IngestStats,
    pub reference_time_ms: Option<u64>,
    /// Market state at the reference time, as handed to the predictor.
    pub context: Option<FeatureContext>,
}

impl PipelineRun {
    fn empty() -> Self {
        Self { zones: Vec::new(), stats: IngestStats::default(), reference_time_ms: None, context: None }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ZoneConfig,
    scorer: ZoneScorer,
    predictor: Option<SharedPredictor>,
}

impl Pipeline {
    pub fn new(config: ZoneConfig) -> Result<Self> {
        config.validate()?;
        let scorer = ZoneScorer::new(&config);
        Ok(Self { config, scorer, predictor: None })
    }

    /// Attach hold/break predictions to every zone this pipeline returns.
    pub fn with_predictor(mut self, predictor: Arc<dyn ZonePredictor>) -> Self {
        self.predictor = Some(SharedPredictor::new(predictor));
        self
    }

    pub fn predictor(&self) -> Option<&SharedPredictor> {
        self.predictor.as_ref()
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn scorer(&self) -> &ZoneScorer {
        &self.scorer
    }

    /// Latest record timestamp; the default "now" so results do not depend
    /// on the wall clock.
    pub fn reference_time(&self, records: &[MarketRecord]) -> Option<u64> {
        records.iter().map(MarketRecord::ts_ms).max()
    }

    /// Zones over the configured `window_minutes`.
    pub fn compute_zones(&self, records: &[MarketRecord], reference_time: Option<u64>) -> Vec<Zone> {
        self.compute_zones_window(records, self.config.window_ms(), reference_time)
    }

    pub fn compute_zones_window(
        &self,
        records: &[MarketRecord],
        window_ms: u64,
        reference_time: Option<u64>,
    ) -> Vec<Zone> {
        self.run(records, window_ms, reference_time).zones
    }

    /// Full run over `[reference - window_ms, reference]`. Extraction sees
    /// the whole input so rolling state is warmed up before the window.
    pub fn run(&self, records: &[MarketRecord], window_ms: u64, reference_time: Option<u64>) -> PipelineRun {
        let mut run = self.run_unenriched(records, window_ms, reference_time);
        if let (Some(predictor), Some(ctx)) = (&self.predictor, run.context) {
            predictor.enrich(&mut run.zones, &ctx);
        }
        run
    }

    /// [`run`](Self::run) without predictions, for callers that enrich
    /// after further scoring.
    pub(crate) fn run_unenriched(
        &self,
        records: &[MarketRecord],
        window_ms: u64,
        reference_time: Option<u64>,
    ) -> PipelineRun {
        let reference = reference_time.or_else(|| self.reference_time(records));
        let Some(reference) = reference else {
            return PipelineRun::empty();
        };
        let from = reference.saturating_sub(window_ms);

        let upto: Vec<MarketRecord> = records.iter().filter(|r| r.ts_ms() <= reference).cloned().collect();
        let (events, extractor) = run_extractor(&upto, SignalExtractor::from_config(&self.config));
        let in_window: Vec<_> = events.into_iter().filter(|e| e.ts_ms >= from).collect();

        let raw = cluster(&in_window, self.config.pct_merge);
        // shape is checked by the scorer
        let candles: Vec<_> = upto
            .iter()
            .filter_map(|r| match r {
                MarketRecord::Candle(c) if extractor.tracks_candle(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        let scored = self.scorer.score_all(&raw, &candles, reference);
        let zones = self.scorer.filter_and_rank(scored);

        log_pipeline_summary(self.config.symbol.as_deref(), records.len(), in_window.len(), zones.len());
        PipelineRun {
            zones,
            stats: extractor.stats().clone(),
            reference_time_ms: Some(reference),
            context: Some(extractor.feature_context(reference)),
        }
    }
}

/// Zone whose mean is relatively closest to `price`.
pub fn nearest_zone(zones: &[Zone], price: f64) -> Option<&Zone> {
    zones
        .iter()
        .filter(|z| z.price_mean > 0.0)
        .min_by(|a, b| a.distance_pct(price).total_cmp(&b.distance_pct(price)))
}
