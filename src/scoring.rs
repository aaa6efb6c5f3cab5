//! Zone strength, entry bands and the four-factor quality score.
//!
//! Strength answers "how much liquidation activity, how recently" on a
//! fixed scale. Quality ranks zones against the other zones in the same
//! set: volume and density are normalised by the set maxima.

use crate::config::ZoneConfig;
use crate::indicators::atr_from_candles;
use crate::logging::log_band_fallback;
use crate::types::{Candle, MinQuality, QualityLabel, Zone};

/// usd at which the volume term of strength saturates
pub const STRENGTH_USD_CAP: f64 = 1e8;
/// event count at which the count term of strength saturates
pub const STRENGTH_COUNT_CAP: f64 = 1000.0;
pub const STRENGTH_HALF_LIFE_HOURS: f64 = 24.0;
pub const RECENCY_SCALE_HOURS: f64 = 6.0;

/// Set-wide inputs for scoring one zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreContext {
    pub reference_time_ms: u64,
    /// Last ATR of the candle series; `None` selects the percentage band.
    pub atr: Option<f64>,
    pub max_usd: f64,
    pub max_density: f64,
}

/// Breakdown of the quality score, each factor on 0-100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityFactors {
    pub volume: f64,
    pub recency: f64,
    pub density: f64,
    pub tightness: f64,
}

impl QualityFactors {
    pub fn total(&self) -> f64 {
        let raw = 0.4 * self.volume + 0.3 * self.recency + 0.2 * self.density + 0.1 * self.tightness;
        (raw.clamp(0.0, 100.0) * 10.0).round() / 10.0
    }
}

/// Strength in [0, 1]: saturating log volume and count, halved every 24h.
pub fn strength(total_usd: f64, count: u32, age_hours: f64) -> f64 {
    let usd_term = (total_usd.max(0.0).ln_1p() / STRENGTH_USD_CAP.ln_1p()).min(1.0);
    let count_term = ((count as f64).ln_1p() / STRENGTH_COUNT_CAP.ln_1p()).min(1.0);
    let decay = 2f64.powf(-age_hours.max(0.0) / STRENGTH_HALF_LIFE_HOURS);
    ((0.6 * usd_term + 0.4 * count_term) * decay).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct ZoneScorer {
    pct_merge: f64,
    zone_vol_mult: f64,
    atr_period: usize,
    min_quality: MinQuality,
}

impl ZoneScorer {
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            pct_merge: config.pct_merge,
            zone_vol_mult: config.zone_vol_mult,
            atr_period: config.atr_period,
            min_quality: config.min_quality,
        }
    }

    /// Events per relative spread: tight zones with many events score high.
    pub fn density(&self, zone: &Zone) -> f64 {
        zone.count as f64 / (1.0 + zone.spread_pct() / self.pct_merge)
    }

    /// ATR of `candles`, or `None` (logged) when the series is unusable.
    pub fn atr(&self, candles: &[Candle]) -> Option<f64> {
        match atr_from_candles(candles, self.atr_period) {
            Ok(v) => Some(v),
            Err(reason) => {
                log_band_fallback(reason);
                None
            }
        }
    }

    pub fn context(&self, zones: &[Zone], atr: Option<f64>, reference_time_ms: u64) -> ScoreContext {
        ScoreContext {
            reference_time_ms,
            atr,
            max_usd: zones.iter().map(|z| z.total_usd).fold(0.0, f64::max),
            max_density: zones.iter().map(|z| self.density(z)).fold(0.0, f64::max),
        }
    }

    pub fn band(&self, zone: &Zone, ctx: &ScoreContext) -> f64 {
        match ctx.atr {
            Some(atr) if atr > 0.0 => atr * self.zone_vol_mult,
            _ => zone.price_mean * self.pct_merge,
        }
    }

    pub fn quality(&self, zone: &Zone, ctx: &ScoreContext) -> QualityFactors {
        let age_h = zone.age_hours(ctx.reference_time_ms);
        let log_ratio = |v: f64, max: f64| {
            if max > 0.0 {
                (100.0 * v.max(0.0).ln_1p() / max.ln_1p()).min(100.0)
            } else {
                0.0
            }
        };
        QualityFactors {
            volume: log_ratio(zone.total_usd, ctx.max_usd),
            recency: 100.0 / (1.0 + age_h / RECENCY_SCALE_HOURS),
            density: log_ratio(self.density(zone), ctx.max_density),
            tightness: 100.0 * (-10.0 * zone.spread_pct()).exp(),
        }
    }

    pub fn score(&self, zone: &Zone, ctx: &ScoreContext) -> Zone {
        let mut z = zone.clone();
        let band = self.band(zone, ctx);
        z.band = band;
        z.entry_low = z.price_mean - band;
        z.entry_high = z.price_mean + band;
        z.strength = strength(z.total_usd, z.count, z.age_hours(ctx.reference_time_ms));
        z.quality_score = self.quality(zone, ctx).total();
        z.quality_label = QualityLabel::from_score(z.quality_score);
        z
    }

    /// Score a whole zone set against shared normalisers.
    pub fn score_all(&self, zones: &[Zone], candles: &[Candle], reference_time_ms: u64) -> Vec<Zone> {
        if zones.is_empty() {
            return Vec::new();
        }
        let atr = self.atr(candles);
        let ctx = self.context(zones, atr, reference_time_ms);
        zones.iter().map(|z| self.score(z, &ctx)).collect()
    }

    /// Drop zones below `min_quality`, strongest first.
    pub fn filter_and_rank(&self, zones: Vec<Zone>) -> Vec<Zone> {
        let mut kept: Vec<Zone> = zones
            .into_iter()
            .filter(|z| self.min_quality.admits(z.quality_label))
            .collect();
        kept.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        kept
    }
}
