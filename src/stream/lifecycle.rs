//! Zone lifecycle state machine.
//!
//! Forming -> Active -> Broken. Broken is terminal: any further event is a
//! transition error and the engine drops the zone for good.

use crate::cluster::ZoneAccumulator;
use crate::types::{InferredLiquidationEvent, LiqSide, Zone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    /// Tracked but not yet announced.
    Forming,
    Active,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakReason {
    /// Enough consecutive closes beyond the band.
    PriceBreak,
    /// No reinforcing event within the window.
    Expired,
}

impl BreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakReason::PriceBreak => "price_break",
            BreakReason::Expired => "expired",
        }
    }
}

/// Stable identity of a tracked zone. `bucket` is the log-price bucket of
/// the current mean and moves with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneIdentity {
    pub id: u64,
    pub side: LiqSide,
    pub bucket: i64,
}

impl ZoneIdentity {
    pub fn new(id: u64, side: LiqSide, price: f64, pct_merge: f64) -> Self {
        Self { id, side, bucket: Self::bucket_of(price, pct_merge) }
    }

    pub fn bucket_of(price: f64, pct_merge: f64) -> i64 {
        if price > 0.0 {
            (price.ln() / (1.0 + pct_merge).ln()).floor() as i64
        } else {
            0
        }
    }

    /// Recompute the bucket; true when it moved.
    pub fn rekey(&mut self, price: f64, pct_merge: f64) -> bool {
        let bucket = Self::bucket_of(price, pct_merge);
        let moved = bucket != self.bucket;
        self.bucket = bucket;
        moved
    }
}

#[derive(Debug, Clone)]
pub struct TrackedZone {
    pub identity: ZoneIdentity,
    pub state: ZoneState,
    pub acc: ZoneAccumulator,
    pub touch_count: u32,
    /// Consecutive closes beyond the band.
    pub beyond_closes: u32,
    /// Last close was within touch tolerance of the mean.
    pub touching: bool,
}

impl TrackedZone {
    pub fn new(id: u64, event: &InferredLiquidationEvent, pct_merge: f64) -> Self {
        Self {
            identity: ZoneIdentity::new(id, event.side, event.price, pct_merge),
            state: ZoneState::Forming,
            acc: ZoneAccumulator::new(event),
            touch_count: 0,
            beyond_closes: 0,
            touching: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.identity.id
    }

    pub fn side(&self) -> LiqSide {
        self.identity.side
    }

    pub fn mean(&self) -> f64 {
        self.acc.mean()
    }

    /// Unscored view of the zone.
    pub fn to_zone(&self) -> Zone {
        let mut z = self.acc.to_zone();
        z.touch_count = self.touch_count;
        z
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LifecycleEvent {
    /// Aggregates grew (event added or zone absorbed).
    Reinforce { min_events: u32 },
    /// Candle close against the zone's current band.
    Close {
        close: f64,
        entry_low: f64,
        entry_high: f64,
        confirm_closes: u32,
        touch_tolerance: f64,
    },
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    Formed,
    /// Close came within touch tolerance.
    Touched,
    /// Price left the zone again without breaking it.
    Held,
    Broken(BreakReason),
    /// Forming zone expired before it was announced.
    Dropped,
}

#[derive(Debug, Clone)]
pub struct TransitionError {
    pub msg: String,
}

pub fn apply_event(zone: &mut TrackedZone, event: LifecycleEvent) -> Result<Transition, TransitionError> {
    match (zone.state, event) {
        (ZoneState::Forming, LifecycleEvent::Reinforce { min_events }) => {
            if zone.acc.count >= min_events {
                zone.state = ZoneState::Active;
                Ok(Transition::Formed)
            } else {
                Ok(Transition::None)
            }
        }
        (ZoneState::Active, LifecycleEvent::Reinforce { .. }) => Ok(Transition::None),
        (ZoneState::Forming, LifecycleEvent::Close { .. }) => Ok(Transition::None),
        (
            ZoneState::Active,
            LifecycleEvent::Close {
                close,
                entry_low,
                entry_high,
                confirm_closes,
                touch_tolerance,
            },
        ) => {
            let beyond = match zone.side() {
                LiqSide::Long => close > entry_high,
                LiqSide::Short => close < entry_low,
            };
            let mean = zone.mean();
            let near = mean > 0.0 && (close - mean).abs() / mean < touch_tolerance;
            let was_touching = zone.touching;
            zone.touching = near;

            if beyond {
                zone.beyond_closes += 1;
                if confirm_closes > 0 && zone.beyond_closes >= confirm_closes {
                    zone.state = ZoneState::Broken;
                    return Ok(Transition::Broken(BreakReason::PriceBreak));
                }
                return Ok(Transition::None);
            }
            zone.beyond_closes = 0;
            match (was_touching, near) {
                (false, true) => {
                    zone.touch_count += 1;
                    Ok(Transition::Touched)
                }
                (true, false) => Ok(Transition::Held),
                _ => Ok(Transition::None),
            }
        }
        (ZoneState::Forming, LifecycleEvent::Expire) => Ok(Transition::Dropped),
        (ZoneState::Active, LifecycleEvent::Expire) => {
            zone.state = ZoneState::Broken;
            Ok(Transition::Broken(BreakReason::Expired))
        }
        (ZoneState::Broken, ev) => Err(TransitionError {
            msg: format!("zone {} is broken, got {:?}", zone.id(), ev),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatternSource;

    fn tracked(side: LiqSide) -> TrackedZone {
        let e = InferredLiquidationEvent {
            symbol: "BTC".to_string(),
            price: 100.0,
            usd_value: 50.0,
            side,
            ts_ms: 0,
            weight: 1.0,
            pattern_source: PatternSource::LargeTrade,
        };
        TrackedZone::new(1, &e, 0.003)
    }

    fn close(c: f64) -> LifecycleEvent {
        LifecycleEvent::Close {
            close: c,
            entry_low: 99.0,
            entry_high: 101.0,
            confirm_closes: 3,
            touch_tolerance: 0.005,
        }
    }

    #[test]
    fn test_forming_to_active() {
        let mut z = tracked(LiqSide::Long);
        assert_eq!(apply_event(&mut z, LifecycleEvent::Reinforce { min_events: 2 }).unwrap(), Transition::None);
        z.acc.count = 2;
        assert_eq!(apply_event(&mut z, LifecycleEvent::Reinforce { min_events: 2 }).unwrap(), Transition::Formed);
        assert_eq!(z.state, ZoneState::Active);
    }

    #[test]
    fn test_break_needs_consecutive_closes() {
        let mut z = tracked(LiqSide::Long);
        z.state = ZoneState::Active;
        apply_event(&mut z, close(102.0)).unwrap();
        apply_event(&mut z, close(102.0)).unwrap();
        // back inside resets the counter
        apply_event(&mut z, close(100.8)).unwrap();
        assert_eq!(z.beyond_closes, 0);
        apply_event(&mut z, close(102.0)).unwrap();
        apply_event(&mut z, close(102.0)).unwrap();
        let t = apply_event(&mut z, close(102.0)).unwrap();
        assert_eq!(t, Transition::Broken(BreakReason::PriceBreak));
        assert!(apply_event(&mut z, close(100.0)).is_err());
    }

    #[test]
    fn test_short_breaks_below() {
        let mut z = tracked(LiqSide::Short);
        z.state = ZoneState::Active;
        for _ in 0..5 {
            assert_eq!(apply_event(&mut z, close(102.0)).unwrap(), Transition::None);
        }
        apply_event(&mut z, close(98.0)).unwrap();
        apply_event(&mut z, close(98.0)).unwrap();
        assert!(matches!(apply_event(&mut z, close(98.0)).unwrap(), Transition::Broken(_)));
    }

    #[test]
    fn test_touch_then_hold() {
        let mut z = tracked(LiqSide::Long);
        z.state = ZoneState::Active;
        assert_eq!(apply_event(&mut z, close(100.2)).unwrap(), Transition::Touched);
        assert_eq!(apply_event(&mut z, close(100.1)).unwrap(), Transition::None);
        assert_eq!(apply_event(&mut z, close(99.0)).unwrap(), Transition::Held);
        assert_eq!(z.touch_count, 1);
    }

    #[test]
    fn test_expiry() {
        let mut z = tracked(LiqSide::Long);
        assert_eq!(apply_event(&mut z, LifecycleEvent::Expire).unwrap(), Transition::Dropped);
        z.state = ZoneState::Active;
        assert_eq!(
            apply_event(&mut z, LifecycleEvent::Expire).unwrap(),
            Transition::Broken(BreakReason::Expired)
        );
    }

    #[test]
    fn test_bucket_rekey() {
        let mut id = ZoneIdentity::new(1, LiqSide::Long, 100.0, 0.003);
        assert!(!id.rekey(100.01, 0.003));
        assert!(id.rekey(101.0, 0.003));
    }
}
