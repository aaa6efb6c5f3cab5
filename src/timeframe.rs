//! Timeframe set and cross-timeframe zone alignment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ZoneError};
use crate::pipeline::Pipeline;
use crate::types::{MarketRecord, Zone};

/// Lookback windows a zone set can be computed over. Identifiers are
/// case-sensitive: `1m` is one minute, `1M` one month (30 days).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Month1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::D3,
        Timeframe::W1,
        Timeframe::Month1,
    ];

    pub fn minutes(&self) -> u64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H8 => 480,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1_440,
            Timeframe::D3 => 4_320,
            Timeframe::W1 => 10_080,
            Timeframe::Month1 => 43_200,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.minutes() * 60_000
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::D3 => "3d",
            Timeframe::W1 => "1w",
            Timeframe::Month1 => "1M",
        }
    }

    /// Comma/space separated identifiers. Fails on the first unknown one.
    pub fn parse_list(s: &str) -> Result<Vec<Timeframe>> {
        let tfs = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>>>()?;
        if tfs.is_empty() {
            return Err(ZoneError::NoTimeframes);
        }
        Ok(tfs)
    }
}

impl FromStr for Timeframe {
    type Err = ZoneError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| ZoneError::UnknownTimeframe(s.to_string()))
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zones within this fraction of each other's mean count as aligned.
pub const ALIGNMENT_TOLERANCE: f64 = 0.005;

/// Runs the batch pipeline once per timeframe and scores how many other
/// timeframes agree on each zone's price.
#[derive(Debug, Clone)]
pub struct MultiTimeframeAggregator {
    pipeline: Pipeline,
}

impl MultiTimeframeAggregator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Aggregate over the timeframes configured on the pipeline.
    pub fn aggregate_configured(&self, records: &[MarketRecord], reference_time: Option<u64>) -> Result<Vec<Zone>> {
        let tfs = self.pipeline.config().timeframes.clone();
        self.aggregate(records, &tfs, reference_time)
    }

    /// Same as [`aggregate`](Self::aggregate) with textual identifiers;
    /// nothing is computed if any identifier is unknown.
    pub fn aggregate_named(
        &self,
        records: &[MarketRecord],
        names: &[&str],
        reference_time: Option<u64>,
    ) -> Result<Vec<Zone>> {
        let tfs = names.iter().map(|n| n.parse()).collect::<Result<Vec<Timeframe>>>()?;
        self.aggregate(records, &tfs, reference_time)
    }

    pub fn aggregate(
        &self,
        records: &[MarketRecord],
        timeframes: &[Timeframe],
        reference_time: Option<u64>,
    ) -> Result<Vec<Zone>> {
        if timeframes.is_empty() {
            return Err(ZoneError::NoTimeframes);
        }
        let reference = reference_time.or_else(|| self.pipeline.reference_time(records));
        let Some(reference) = reference else {
            return Ok(Vec::new());
        };

        // repeated timeframes are evaluated once, first occurrence wins
        let mut unique: Vec<Timeframe> = Vec::with_capacity(timeframes.len());
        for &tf in timeframes {
            if !unique.contains(&tf) {
                unique.push(tf);
            }
        }

        let mut context = None;
        let mut per_tf: Vec<(Timeframe, Vec<Zone>)> = Vec::with_capacity(unique.len());
        for &tf in &unique {
            let run = self.pipeline.run_unenriched(records, tf.window_ms(), Some(reference));
            context = context.or(run.context);
            let mut zones = run.zones;
            for z in zones.iter_mut() {
                z.timeframe = Some(tf);
            }
            per_tf.push((tf, zones));
        }

        let others = unique.len().saturating_sub(1);
        let mut combined = Vec::new();
        for (tf, zones) in &per_tf {
            for zone in zones {
                let aligned = per_tf
                    .iter()
                    .filter(|(other, _)| other != tf)
                    .filter(|(_, other_zones)| {
                        other_zones.iter().any(|o| {
                            (o.price_mean - zone.price_mean).abs() <= zone.price_mean * ALIGNMENT_TOLERANCE
                        })
                    })
                    .count();
                let mut z = zone.clone();
                z.alignment_score = Some(if others > 0 {
                    aligned as f64 / others as f64 * 100.0
                } else {
                    0.0
                });
                combined.push(z);
            }
        }

        combined.sort_by(|a, b| {
            let key = |z: &Zone| z.alignment_score.unwrap_or(0.0);
            key(b)
                .total_cmp(&key(a))
                .then(b.quality_score.total_cmp(&a.quality_score))
        });
        if let (Some(predictor), Some(ctx)) = (self.pipeline.predictor(), context) {
            predictor.enrich(&mut combined, &ctx);
        }
        Ok(combined)
    }
}
