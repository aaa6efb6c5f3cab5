//! Candle indicators used for zone banding.
//!
//! Each indicator maintains its own state and can be updated incrementally;
//! the stream engine feeds candles one at a time, the batch scorer replays a
//! whole series through the same code.

use crate::types::Candle;

/// Exponential moving average with configurable alpha
#[derive(Debug, Clone)]
pub struct Ema {
    pub value: f64,
    pub alpha: f64,
    initialized: bool,
}

impl Ema {
    /// Wilder smoothing: alpha = 1 / period.
    pub fn wilder(period: usize) -> Self {
        Self::with_alpha(1.0 / period.max(1) as f64)
    }

    pub fn with_alpha(alpha: f64) -> Self {
        Self { value: 0.0, alpha, initialized: false }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        if !self.initialized {
            self.value = x;
            self.initialized = true;
        } else {
            self.value = self.value * (1.0 - self.alpha) + x * self.alpha;
        }
        self.value
    }

    pub fn get(&self) -> f64 {
        self.value
    }
}

/// Average True Range with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct Atr {
    ema: Ema,
    prev_close: Option<f64>,
    last_ts: Option<u64>,
    samples: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            ema: Ema::wilder(period),
            prev_close: None,
            last_ts: None,
            samples: 0,
        }
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let tr = if let Some(prev_c) = self.prev_close {
            let hl = high - low;
            let hc = (high - prev_c).abs();
            let lc = (low - prev_c).abs();
            hl.max(hc).max(lc)
        } else {
            high - low
        };
        self.prev_close = Some(close);
        self.samples += 1;
        self.ema.update(tr)
    }

    /// Feed a candle, rejecting malformed or out-of-order ones.
    pub fn update_candle(&mut self, candle: &Candle) -> Result<f64, &'static str> {
        if !candle.is_well_formed() {
            return Err("malformed_candle");
        }
        if let Some(prev) = self.last_ts {
            if candle.ts_ms <= prev {
                return Err("non_monotonic_ts");
            }
        }
        self.last_ts = Some(candle.ts_ms);
        Ok(self.update(candle.high, candle.low, candle.close))
    }

    /// Current ATR, once at least one candle has been seen.
    pub fn get(&self) -> Option<f64> {
        if self.samples > 0 {
            Some(self.ema.get())
        } else {
            None
        }
    }
}

/// Last ATR value of a candle series, or why it could not be computed.
///
/// Any malformed candle or timestamp regression invalidates the whole
/// series; callers fall back to a percentage band.
pub fn atr_from_candles(candles: &[Candle], period: usize) -> Result<f64, &'static str> {
    if candles.is_empty() {
        return Err("no_candles");
    }
    let mut atr = Atr::new(period);
    for c in candles {
        atr.update_candle(c)?;
    }
    match atr.get() {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err("zero_range"),
    }
}

/// VWAP of candle closes. `period = None` gives the cumulative VWAP,
/// otherwise a rolling window of that many candles. Windows with no
/// volume carry the previous value forward (0.0 before any volume).
pub fn vwap(candles: &[Candle], period: Option<usize>) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    let mut last = 0.0;
    for i in 0..candles.len() {
        let start = match period {
            Some(p) => (i + 1).saturating_sub(p.max(1)),
            None => 0,
        };
        let (pv, v) = candles[start..=i].iter().fold((0.0, 0.0), |(pv, v), c| {
            let vol = if c.volume.is_finite() { c.volume } else { 0.0 };
            (pv + c.close * vol, v + vol)
        });
        if v > 0.0 {
            last = pv / v;
        }
        out.push(last);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts_ms: u64, high: f64, low: f64, close: f64) -> Candle {
        Candle { symbol: None, ts_ms, open: close, high, low, close, volume: 1.0 }
    }

    #[test]
    fn test_ema() {
        let mut ema = Ema::wilder(10);
        for i in 1..=20 {
            ema.update(i as f64);
        }
        // Between first and last value, biased toward recent
        assert!(ema.get() > 10.0 && ema.get() < 20.0);
    }

    #[test]
    fn test_atr_constant_range() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| candle(i * 60_000, 101.0, 99.0, 100.0))
            .collect();
        let atr = atr_from_candles(&candles, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_uses_gap_from_previous_close() {
        let mut atr = Atr::new(1);
        atr.update(101.0, 99.0, 100.0);
        // Gap up: true range is high - prev close
        let v = atr.update(111.0, 109.0, 110.0);
        assert!((v - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_rejects_bad_series() {
        assert_eq!(atr_from_candles(&[], 14), Err("no_candles"));
        let unordered = vec![candle(2, 101.0, 99.0, 100.0), candle(1, 101.0, 99.0, 100.0)];
        assert_eq!(atr_from_candles(&unordered, 14), Err("non_monotonic_ts"));
        let broken = vec![candle(1, 99.0, 101.0, 100.0)];
        assert_eq!(atr_from_candles(&broken, 14), Err("malformed_candle"));
    }

    #[test]
    fn test_vwap_cumulative_and_rolling() {
        let mut candles = vec![candle(1, 11.0, 9.0, 10.0), candle(2, 21.0, 19.0, 20.0)];
        candles[1].volume = 3.0;
        let cum = vwap(&candles, None);
        assert!((cum[0] - 10.0).abs() < 1e-9);
        assert!((cum[1] - 17.5).abs() < 1e-9);
        let rolling = vwap(&candles, Some(1));
        assert!((rolling[1] - 20.0).abs() < 1e-9);
    }
}
