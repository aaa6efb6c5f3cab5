use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ZoneError;
use crate::predictor::ZonePrediction;
use crate::timeframe::Timeframe;

/// Aggressor side of a public trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressor {
    /// Buyer lifted the ask.
    Buy,
    /// Seller hit the bid.
    Sell,
    Unknown,
}

/// Which positions were forcibly closed.
///
/// `Long` liquidations are market sells and leave resistance behind;
/// `Short` liquidations are market buys and leave support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiqSide {
    Long,
    Short,
}

impl LiqSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiqSide::Long => "long",
            LiqSide::Short => "short",
        }
    }

    /// Side implied by aggressor flow, if the aggressor is known.
    pub fn from_aggressor(aggressor: Aggressor) -> Option<Self> {
        match aggressor {
            Aggressor::Sell => Some(LiqSide::Long),
            Aggressor::Buy => Some(LiqSide::Short),
            Aggressor::Unknown => None,
        }
    }
}

impl fmt::Display for LiqSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    LargeTrade,
    VolumeSpike,
    FundingExtreme,
    OiDrop,
}

impl PatternSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternSource::LargeTrade => "large_trade",
            PatternSource::VolumeSpike => "volume_spike",
            PatternSource::FundingExtreme => "funding_extreme",
            PatternSource::OiDrop => "oi_drop",
        }
    }
}

// =============================================================================
// Input records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub price: f64,
    pub size: f64,
    pub side: Aggressor,
    pub ts_ms: u64,
}

impl TradeRecord {
    pub fn new(symbol: &str, price: f64, size: f64, side: Aggressor, ts_ms: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            size,
            side,
            ts_ms,
        }
    }

    pub fn usd_value(&self) -> f64 {
        self.price * self.size
    }

    pub fn is_well_formed(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.size.is_finite() && self.size > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRecord {
    pub symbol: String,
    pub funding_rate: f64,
    pub open_interest: Option<f64>,
    pub ts_ms: u64,
}

impl FundingRecord {
    pub fn is_well_formed(&self) -> bool {
        self.funding_rate.is_finite()
            && self.open_interest.map_or(true, |oi| oi.is_finite() && oi >= 0.0)
    }
}

/// OHLC bar. A candle without `symbol` is taken to belong to the market
/// being tracked; a tagged one is dropped by a symbol filter that does not
/// match it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub ts_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn is_well_formed(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.low > 0.0
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}

/// Canonical record delivered by collectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MarketRecord {
    Trade(TradeRecord),
    Funding(FundingRecord),
    Candle(Candle),
}

impl MarketRecord {
    pub fn ts_ms(&self) -> u64 {
        match self {
            MarketRecord::Trade(t) => t.ts_ms,
            MarketRecord::Funding(f) => f.ts_ms,
            MarketRecord::Candle(c) => c.ts_ms,
        }
    }
}

/// Stable sort by timestamp; ties keep arrival order.
pub fn sorted_by_time(records: &[MarketRecord]) -> Vec<&MarketRecord> {
    let mut out: Vec<&MarketRecord> = records.iter().collect();
    out.sort_by_key(|r| r.ts_ms());
    out
}

// =============================================================================
// Derived events and zones
// =============================================================================

/// Synthetic liquidation signal. `usd_value` already includes `weight`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredLiquidationEvent {
    /// Normalised market symbol.
    pub symbol: String,
    pub price: f64,
    pub usd_value: f64,
    pub side: LiqSide,
    pub ts_ms: u64,
    pub weight: f64,
    pub pattern_source: PatternSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLabel {
    Weak,
    Medium,
    Strong,
}

impl QualityLabel {
    pub const MEDIUM_MIN: f64 = 40.0;
    pub const STRONG_MIN: f64 = 70.0;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::STRONG_MIN {
            QualityLabel::Strong
        } else if score >= Self::MEDIUM_MIN {
            QualityLabel::Medium
        } else {
            QualityLabel::Weak
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Weak => "weak",
            QualityLabel::Medium => "medium",
            QualityLabel::Strong => "strong",
        }
    }
}

/// Output filter on quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinQuality {
    #[default]
    None,
    Weak,
    Medium,
    Strong,
}

impl MinQuality {
    pub fn admits(&self, label: QualityLabel) -> bool {
        match self {
            MinQuality::None | MinQuality::Weak => true,
            MinQuality::Medium => label >= QualityLabel::Medium,
            MinQuality::Strong => label == QualityLabel::Strong,
        }
    }
}

impl FromStr for MinQuality {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "all" => Ok(MinQuality::None),
            "weak" => Ok(MinQuality::Weak),
            "medium" => Ok(MinQuality::Medium),
            "strong" => Ok(MinQuality::Strong),
            _ => Err(ZoneError::UnknownQuality(s.to_string())),
        }
    }
}

/// Clustered price band of inferred liquidation activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub price_mean: f64,
    pub price_min: f64,
    pub price_max: f64,
    pub entry_low: f64,
    pub entry_high: f64,
    /// Half-width of the entry band.
    pub band: f64,
    pub total_usd: f64,
    pub count: u32,
    pub strength: f64,
    pub dominant_side: LiqSide,
    pub quality_score: f64,
    pub quality_label: QualityLabel,
    pub touch_count: u32,
    pub first_seen: u64,
    pub last_updated: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<ZonePrediction>,
}

impl Zone {
    /// (max - min) / mean
    pub fn spread_pct(&self) -> f64 {
        if self.price_mean > 0.0 {
            (self.price_max - self.price_min) / self.price_mean
        } else {
            0.0
        }
    }

    pub fn age_hours(&self, now_ms: u64) -> f64 {
        now_ms.saturating_sub(self.last_updated) as f64 / 3_600_000.0
    }

    /// Relative distance from `price` to the zone mean.
    pub fn distance_pct(&self, price: f64) -> f64 {
        if self.price_mean > 0.0 {
            (self.price_mean - price).abs() / self.price_mean
        } else {
            f64::INFINITY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggressor_side_mapping() {
        assert_eq!(LiqSide::from_aggressor(Aggressor::Sell), Some(LiqSide::Long));
        assert_eq!(LiqSide::from_aggressor(Aggressor::Buy), Some(LiqSide::Short));
        assert_eq!(LiqSide::from_aggressor(Aggressor::Unknown), None);
    }

    #[test]
    fn test_quality_label_thresholds() {
        assert_eq!(QualityLabel::from_score(70.0), QualityLabel::Strong);
        assert_eq!(QualityLabel::from_score(69.9), QualityLabel::Medium);
        assert_eq!(QualityLabel::from_score(40.0), QualityLabel::Medium);
        assert_eq!(QualityLabel::from_score(39.9), QualityLabel::Weak);
    }

    #[test]
    fn test_min_quality_parse_and_admit() {
        assert_eq!("Strong".parse::<MinQuality>().unwrap(), MinQuality::Strong);
        assert_eq!("none".parse::<MinQuality>().unwrap(), MinQuality::None);
        assert!("great".parse::<MinQuality>().is_err());
        assert!(MinQuality::Medium.admits(QualityLabel::Strong));
        assert!(!MinQuality::Medium.admits(QualityLabel::Weak));
        assert!(!MinQuality::Strong.admits(QualityLabel::Medium));
    }

    #[test]
    fn test_candle_shape_checks() {
        let good = Candle { symbol: None, ts_ms: 0, open: 10.0, high: 11.0, low: 9.0, close: 10.5, volume: 1.0 };
        assert!(good.is_well_formed());
        let inverted = Candle { high: 8.0, ..good.clone() };
        assert!(!inverted.is_well_formed());
        let nan = Candle { close: f64::NAN, ..good };
        assert!(!nan.is_well_formed());
    }

    #[test]
    fn test_record_serde_tagging() {
        let rec = MarketRecord::Trade(TradeRecord::new("BTC", 100.0, 0.5, Aggressor::Sell, 42));
        let s = serde_json::to_string(&rec).unwrap();
        assert!(s.contains("\"kind\":\"trade\""));
        let back: MarketRecord = serde_json::from_str(&s).unwrap();
        assert_eq!(back.ts_ms(), 42);
    }
}
