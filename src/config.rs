use crate::error::{Result, ZoneError};
use crate::timeframe::Timeframe;
use crate::types::MinQuality;

/// Thresholds for turning trades and funding/OI samples into liquidation signals.
#[derive(Debug, Clone)]
pub struct ExtractorThresholds {
    /// Base-asset size at or above which a trade counts as a likely liquidation.
    pub liq_size_threshold: f64,
    /// Trades in the rolling size average used for spike detection.
    pub spike_window: usize,
    pub spike_mult: f64,
    /// Minimum relative price move accompanying a volume spike.
    pub spike_min_move: f64,
    /// |funding| above this is extreme.
    pub funding_extreme: f64,
    pub funding_mult: f64,
    /// How long a funding sample prevails after its timestamp.
    pub funding_validity_ms: u64,
    /// Relative OI decrease that confirms liquidations.
    pub oi_drop_pct: f64,
    pub oi_mult: f64,
    /// Events this far before an OI drop get the OI multiplier.
    pub oi_confirm_window_ms: u64,
}

impl Default for ExtractorThresholds {
    fn default() -> Self {
        Self {
            liq_size_threshold: 0.1,
            spike_window: 20,
            spike_mult: 2.0,
            spike_min_move: 0.001,
            funding_extreme: 0.001,
            funding_mult: 1.5,
            funding_validity_ms: 8 * 3_600_000,
            oi_drop_pct: 0.05,
            oi_mult: 2.0,
            oi_confirm_window_ms: 5 * 60_000,
        }
    }
}

/// Pipeline and stream configuration.
///
/// Every toggle lives here and is handed to constructors; nothing is read
/// from ambient state once a pipeline exists.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Restrict processing to one symbol (compared after normalisation).
    pub symbol: Option<String>,
    /// Clustering tolerance as a fraction of price.
    pub pct_merge: f64,
    /// ATR multiplier for the entry band.
    pub zone_vol_mult: f64,
    pub atr_period: usize,
    /// Lookback for batch recomputation and stream retention.
    pub window_minutes: u64,
    pub min_quality: MinQuality,
    pub timeframes: Vec<Timeframe>,
    pub thresholds: ExtractorThresholds,
    /// Consecutive closes beyond the band that break a zone; 0 disables.
    pub break_confirm_closes: u32,
    /// Events a stream zone needs before it is announced.
    pub min_zone_events: u32,
    /// Break zones that receive no event for `window_minutes`.
    pub age_out: bool,
    /// A candle within this fraction of a zone mean counts as a touch.
    pub touch_tolerance: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            symbol: None,
            pct_merge: 0.003,
            zone_vol_mult: 1.5,
            atr_period: 14,
            window_minutes: 60,
            min_quality: MinQuality::None,
            timeframes: Timeframe::ALL.to_vec(),
            thresholds: ExtractorThresholds::default(),
            break_confirm_closes: 3,
            min_zone_events: 1,
            age_out: true,
            touch_tolerance: 0.005,
        }
    }
}

impl ZoneConfig {
    /// Build from environment variables, falling back to defaults for
    /// anything unset. Enumerated values that fail to parse are errors.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let t = ExtractorThresholds::default();
        let min_quality = match std::env::var("MIN_QUALITY") {
            Ok(v) => v.parse()?,
            Err(_) => d.min_quality,
        };
        let timeframes = match std::env::var("TIMEFRAMES") {
            Ok(v) => Timeframe::parse_list(&v)?,
            Err(_) => d.timeframes,
        };
        let cfg = Self {
            symbol: std::env::var("SYMBOL").ok().filter(|s| !s.trim().is_empty()),
            pct_merge: std::env::var("PCT_MERGE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.pct_merge),
            zone_vol_mult: std::env::var("ZONE_VOL_MULT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.zone_vol_mult),
            atr_period: std::env::var("ATR_PERIOD").ok().and_then(|v| v.parse().ok()).unwrap_or(d.atr_period),
            window_minutes: std::env::var("WINDOW_MINUTES").ok().and_then(|v| v.parse().ok()).unwrap_or(d.window_minutes),
            min_quality,
            timeframes,
            thresholds: ExtractorThresholds {
                liq_size_threshold: std::env::var("LIQ_SIZE_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(t.liq_size_threshold),
                funding_extreme: std::env::var("FUNDING_EXTREME").ok().and_then(|v| v.parse().ok()).unwrap_or(t.funding_extreme),
                oi_drop_pct: std::env::var("OI_DROP_PCT").ok().and_then(|v| v.parse().ok()).unwrap_or(t.oi_drop_pct),
                ..t
            },
            break_confirm_closes: std::env::var("BREAK_CONFIRM_CLOSES").ok().and_then(|v| v.parse().ok()).unwrap_or(d.break_confirm_closes),
            min_zone_events: std::env::var("MIN_ZONE_EVENTS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.min_zone_events),
            age_out: std::env::var("AGE_OUT").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(d.age_out),
            touch_tolerance: d.touch_tolerance,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// One leap year.
    pub const MAX_WINDOW_MINUTES: u64 = 366 * 24 * 60;

    pub fn validate(&self) -> Result<()> {
        if !(self.pct_merge > 0.0 && self.pct_merge < 0.1) {
            return Err(ZoneError::invalid("pct_merge", format!("{} not in (0, 0.1)", self.pct_merge)));
        }
        if !(self.zone_vol_mult > 0.0 && self.zone_vol_mult.is_finite()) {
            return Err(ZoneError::invalid("zone_vol_mult", "must be positive"));
        }
        if self.atr_period == 0 {
            return Err(ZoneError::invalid("atr_period", "must be at least 1"));
        }
        if self.window_minutes == 0 || self.window_minutes > Self::MAX_WINDOW_MINUTES {
            return Err(ZoneError::invalid(
                "window_minutes",
                format!("{} not in [1, {}]", self.window_minutes, Self::MAX_WINDOW_MINUTES),
            ));
        }
        if self.min_zone_events == 0 {
            return Err(ZoneError::invalid("min_zone_events", "must be at least 1"));
        }
        if !(self.touch_tolerance >= 0.0 && self.touch_tolerance.is_finite()) {
            return Err(ZoneError::invalid("touch_tolerance", "must be non-negative"));
        }
        let t = &self.thresholds;
        if !(t.liq_size_threshold > 0.0) {
            return Err(ZoneError::invalid("liq_size_threshold", "must be positive"));
        }
        if t.spike_window == 0 {
            return Err(ZoneError::invalid("spike_window", "must be at least 1"));
        }
        for (field, v) in [
            ("spike_mult", t.spike_mult),
            ("funding_mult", t.funding_mult),
            ("oi_mult", t.oi_mult),
        ] {
            if !(v >= 1.0 && v.is_finite()) {
                return Err(ZoneError::invalid(field, "multipliers must be >= 1"));
            }
        }
        if !(t.oi_drop_pct > 0.0 && t.oi_drop_pct < 1.0) {
            return Err(ZoneError::invalid("oi_drop_pct", "must be in (0, 1)"));
        }
        Ok(())
    }

    pub fn window_ms(&self) -> u64 {
        self.window_minutes.saturating_mul(60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = ZoneConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timeframes.len(), 15);
        assert!((cfg.pct_merge - 0.003).abs() < 1e-12);
        assert_eq!(cfg.window_ms(), 3_600_000);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cfg = ZoneConfig { pct_merge: 0.0, ..Default::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ZoneError::InvalidConfig { field: "pct_merge", .. })
        ));

        let cfg = ZoneConfig { min_zone_events: 0, ..Default::default() };
        assert!(cfg.validate().is_err());

        let mut cfg = ZoneConfig::default();
        cfg.thresholds.funding_mult = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_window_is_bounded() {
        let cfg = ZoneConfig { window_minutes: u64::MAX, ..Default::default() };
        assert!(matches!(
            cfg.validate(),
            Err(ZoneError::InvalidConfig { field: "window_minutes", .. })
        ));
        assert_eq!(cfg.window_ms(), u64::MAX);

        let cfg = ZoneConfig { window_minutes: ZoneConfig::MAX_WINDOW_MINUTES, ..Default::default() };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.window_ms(), 366 * 24 * 3_600_000);
    }
}
