//! Liquidation inference from public trades and funding/OI samples.
//!
//! The extractor is a small state machine fed one record at a time, in
//! timestamp order. Batch extraction and the stream engine drive the same
//! code so both see identical events.

use std::collections::HashMap;

use crate::config::{ExtractorThresholds, ZoneConfig};
use crate::data::{normalize_symbol, IngestStats};
use crate::features::{FeatureContext, RollingStats};
use crate::logging::{log_skipped_record, Domain};
use crate::types::{
    sorted_by_time, Candle, FundingRecord, InferredLiquidationEvent, LiqSide, MarketRecord, PatternSource,
    TradeRecord,
};

/// Retroactive weight boost for events of `symbol` inside
/// `[from_ts, to_ts]`, emitted when that market's open interest drops
/// sharply.
#[derive(Debug, Clone, PartialEq)]
pub struct OiConfirmation {
    /// Normalised market symbol.
    pub symbol: String,
    pub from_ts: u64,
    pub to_ts: u64,
    pub multiplier: f64,
}

impl OiConfirmation {
    pub fn covers(&self, ts_ms: u64) -> bool {
        ts_ms >= self.from_ts && ts_ms <= self.to_ts
    }

    /// Boost `event` if it is of this market and falls in the window.
    /// Returns the usd added.
    pub fn apply(&self, event: &mut InferredLiquidationEvent) -> f64 {
        if event.symbol != self.symbol || !self.covers(event.ts_ms) {
            return 0.0;
        }
        let before = event.usd_value;
        event.weight *= self.multiplier;
        event.usd_value *= self.multiplier;
        event.pattern_source = PatternSource::OiDrop;
        event.usd_value - before
    }
}

/// Result of feeding one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Event(InferredLiquidationEvent),
    OiDrop(OiConfirmation),
    Nothing,
}

#[derive(Debug, Clone)]
struct MarketState {
    sizes: RollingStats,
    last_price: Option<f64>,
    /// (rate, ts) of the latest funding sample
    funding: Option<(f64, u64)>,
    last_oi: Option<f64>,
    /// Latest timestamp already covered by an OI confirmation.
    oi_confirmed_until: Option<u64>,
}

impl MarketState {
    fn new(spike_window: usize) -> Self {
        Self {
            sizes: RollingStats::new(spike_window),
            last_price: None,
            funding: None,
            last_oi: None,
            oi_confirmed_until: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalExtractor {
    thresholds: ExtractorThresholds,
    symbol: Option<String>,
    markets: HashMap<String, MarketState>,
    /// Market of the latest well-formed trade.
    last_market: Option<String>,
    stats: IngestStats,
}

impl SignalExtractor {
    /// `symbol` restricts extraction to one market (compared normalised).
    pub fn new(thresholds: ExtractorThresholds, symbol: Option<&str>) -> Self {
        Self {
            thresholds,
            symbol: symbol.map(normalize_symbol),
            markets: HashMap::new(),
            last_market: None,
            stats: IngestStats::default(),
        }
    }

    pub fn from_config(config: &ZoneConfig) -> Self {
        Self::new(config.thresholds.clone(), config.symbol.as_deref())
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn push(&mut self, record: &MarketRecord) -> Extracted {
        match record {
            MarketRecord::Trade(t) => {
                self.stats.trades += 1;
                self.on_trade(t)
            }
            MarketRecord::Funding(f) => {
                self.stats.funding += 1;
                self.on_funding(f)
            }
            MarketRecord::Candle(c) => {
                self.stats.candles += 1;
                if !self.tracks_candle(c) {
                    self.stats.skipped_symbol += 1;
                }
                Extracted::Nothing
            }
        }
    }

    /// Whether `symbol` passes the symbol filter.
    pub fn tracks(&self, symbol: &str) -> bool {
        self.symbol.as_ref().map_or(true, |want| *want == normalize_symbol(symbol))
    }

    /// Untagged candles belong to the tracked market.
    pub fn tracks_candle(&self, candle: &Candle) -> bool {
        candle.symbol.as_deref().map_or(true, |s| self.tracks(s))
    }

    /// Price and funding of the most recently traded market, as seen at
    /// `now_ms`. Funding older than the validity window reads as 0.
    pub fn feature_context(&self, now_ms: u64) -> FeatureContext {
        let state = self.last_market.as_ref().and_then(|m| self.markets.get(m));
        let funding_rate = state
            .and_then(|s| s.funding)
            .filter(|(_, ts)| now_ms.saturating_sub(*ts) <= self.thresholds.funding_validity_ms)
            .map_or(0.0, |(rate, _)| rate);
        FeatureContext {
            current_price: state.and_then(|s| s.last_price).unwrap_or(0.0),
            now_ms,
            funding_rate,
        }
    }

    fn market(&mut self, key: &str) -> Option<&mut MarketState> {
        if let Some(want) = &self.symbol {
            if want != key {
                self.stats.skipped_symbol += 1;
                return None;
            }
        }
        let window = self.thresholds.spike_window;
        Some(self.markets.entry(key.to_string()).or_insert_with(|| MarketState::new(window)))
    }

    fn on_trade(&mut self, trade: &TradeRecord) -> Extracted {
        if !trade.is_well_formed() {
            self.stats.skipped_malformed += 1;
            log_skipped_record(Domain::Signal, "trade", "malformed", trade.ts_ms);
            return Extracted::Nothing;
        }
        let t = self.thresholds.clone();
        let key = normalize_symbol(&trade.symbol);
        let Some(state) = self.market(&key) else {
            return Extracted::Nothing;
        };

        state.sizes.push(trade.size);
        let price_move = state.last_price.map(|p| (trade.price - p) / p).unwrap_or(0.0);
        state.last_price = Some(trade.price);

        let large = trade.size >= t.liq_size_threshold;
        let spike = trade.size > t.spike_mult * state.sizes.mean() && price_move.abs() > t.spike_min_move;
        let funding = state
            .funding
            .filter(|(_, ts)| trade.ts_ms.saturating_sub(*ts) <= t.funding_validity_ms)
            .map(|(rate, _)| rate);
        self.last_market = Some(key.clone());
        if !large && !spike {
            return Extracted::Nothing;
        }
        let extreme_funding = funding.filter(|r| r.abs() > t.funding_extreme);

        let by_move = || {
            if price_move < 0.0 {
                Some(LiqSide::Long)
            } else if price_move > 0.0 {
                Some(LiqSide::Short)
            } else {
                None
            }
        };
        let side = if large {
            LiqSide::from_aggressor(trade.side)
                .or_else(by_move)
                .or_else(|| extreme_funding.map(|r| if r > 0.0 { LiqSide::Long } else { LiqSide::Short }))
        } else {
            by_move()
        };
        let Some(side) = side else {
            self.stats.skipped_unattributed += 1;
            log_skipped_record(Domain::Signal, "trade", "side_undecided", trade.ts_ms);
            return Extracted::Nothing;
        };

        let mut weight = 1.0;
        let mut pattern_source = if large { PatternSource::LargeTrade } else { PatternSource::VolumeSpike };
        if extreme_funding.is_some() {
            weight *= t.funding_mult;
            pattern_source = PatternSource::FundingExtreme;
        }

        self.stats.events += 1;
        Extracted::Event(InferredLiquidationEvent {
            symbol: key,
            price: trade.price,
            usd_value: trade.usd_value() * weight,
            side,
            ts_ms: trade.ts_ms,
            weight,
            pattern_source,
        })
    }

    fn on_funding(&mut self, funding: &FundingRecord) -> Extracted {
        if !funding.is_well_formed() {
            self.stats.skipped_malformed += 1;
            log_skipped_record(Domain::Signal, "funding", "malformed", funding.ts_ms);
            return Extracted::Nothing;
        }
        let t = self.thresholds.clone();
        let key = normalize_symbol(&funding.symbol);
        let Some(state) = self.market(&key) else {
            return Extracted::Nothing;
        };

        state.funding = Some((funding.funding_rate, funding.ts_ms));
        let Some(oi) = funding.open_interest else {
            return Extracted::Nothing;
        };
        let prev = state.last_oi.replace(oi);
        let dropped = match prev {
            Some(p) if p > 0.0 => (oi - p) / p < -t.oi_drop_pct,
            _ => false,
        };
        if !dropped {
            return Extracted::Nothing;
        }

        // Windows of one market never overlap, so no event is boosted twice.
        let mut from_ts = funding.ts_ms.saturating_sub(t.oi_confirm_window_ms);
        if let Some(until) = state.oi_confirmed_until {
            if until >= funding.ts_ms {
                return Extracted::Nothing;
            }
            from_ts = from_ts.max(until + 1);
        }
        state.oi_confirmed_until = Some(funding.ts_ms);
        self.stats.oi_drops += 1;
        Extracted::OiDrop(OiConfirmation {
            symbol: key,
            from_ts,
            to_ts: funding.ts_ms,
            multiplier: t.oi_mult,
        })
    }
}

/// Batch extraction over all symbols; see [`extract_with_stats`].
pub fn extract(records: &[MarketRecord], thresholds: &ExtractorThresholds) -> Vec<InferredLiquidationEvent> {
    extract_with_stats(records, thresholds, None).0
}

/// Extract events from `records` in timestamp order (stable for ties).
/// OI confirmations are applied to already-emitted events before return.
pub fn extract_with_stats(
    records: &[MarketRecord],
    thresholds: &ExtractorThresholds,
    symbol: Option<&str>,
) -> (Vec<InferredLiquidationEvent>, IngestStats) {
    let (events, extractor) = run_extractor(records, SignalExtractor::new(thresholds.clone(), symbol));
    (events, extractor.stats)
}

/// Drive `extractor` over `records` and hand it back with the events, so
/// callers can read the market state it ended in.
pub(crate) fn run_extractor(
    records: &[MarketRecord],
    mut extractor: SignalExtractor,
) -> (Vec<InferredLiquidationEvent>, SignalExtractor) {
    let mut events: Vec<InferredLiquidationEvent> = Vec::new();
    for record in sorted_by_time(records) {
        match extractor.push(record) {
            Extracted::Event(e) => events.push(e),
            Extracted::OiDrop(c) => {
                for e in events.iter_mut().rev().take_while(|e| e.ts_ms >= c.from_ts) {
                    c.apply(e);
                }
            }
            Extracted::Nothing => {}
        }
    }
    (events, extractor)
}
