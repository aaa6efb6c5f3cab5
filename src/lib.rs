//! Liquidation zone inference from public market data.
//!
//! Trades, funding rates and open interest are turned into weighted
//! liquidation signals, clustered into price zones, scored, aligned across
//! timeframes and maintained incrementally with lifecycle observers.
//!
//! ```text
//! records ──► signals ──► cluster ──► scoring ──► zones
//!                │                        │
//!                └──── stream (incremental, observers) ──► predictor (optional)
//! ```

pub mod cluster;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod indicators;
pub mod logging;
pub mod pipeline;
pub mod predictor;
pub mod scoring;
pub mod signals;
pub mod stream;
pub mod timeframe;
pub mod types;

pub use config::ZoneConfig;
pub use data::{IngestStats, RecordSource};
pub use error::{Result, ZoneError};
pub use pipeline::{nearest_zone, Pipeline, PipelineRun};
pub use predictor::{
    OutcomeLedger, PredictedOutcome, Prediction, SharedPredictor, ZonePrediction, ZonePredictor,
};
pub use scoring::ZoneScorer;
pub use signals::SignalExtractor;
pub use stream::{StreamEngine, ZoneState};
pub use timeframe::{MultiTimeframeAggregator, Timeframe};
pub use types::{
    Aggressor, Candle, FundingRecord, InferredLiquidationEvent, LiqSide, MarketRecord,
    MinQuality, PatternSource, QualityLabel, TradeRecord, Zone,
};
