//! Lifecycle observer lists.
//!
//! Observers run synchronously, in registration order, after the state
//! transitions of an update have been applied. A failing or panicking
//! observer is logged and counted; it never aborts the update and never
//! stops the observers after it.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::logging::log_observer_error;
use crate::types::Zone;

pub type ObserverResult = Result<(), String>;
pub type ZoneObserver = Box<dyn FnMut(&Zone) -> ObserverResult + Send>;
/// Called with `(new, old)`.
pub type ZoneUpdateObserver = Box<dyn FnMut(&Zone, &Zone) -> ObserverResult + Send>;

#[derive(Default)]
pub struct Observers {
    formed: Vec<ZoneObserver>,
    updated: Vec<ZoneUpdateObserver>,
    broken: Vec<ZoneObserver>,
    errors: u64,
}

impl Observers {
    pub fn add_formed(&mut self, f: ZoneObserver) {
        self.formed.push(f);
    }

    pub fn add_updated(&mut self, f: ZoneUpdateObserver) {
        self.updated.push(f);
    }

    pub fn add_broken(&mut self, f: ZoneObserver) {
        self.broken.push(f);
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn zone_formed(&mut self, zone: &Zone) {
        for (idx, f) in self.formed.iter_mut().enumerate() {
            if !guarded("zone_formed", idx, || f(zone)) {
                self.errors += 1;
            }
        }
    }

    pub fn zone_updated(&mut self, new: &Zone, old: &Zone) {
        for (idx, f) in self.updated.iter_mut().enumerate() {
            if !guarded("zone_updated", idx, || f(new, old)) {
                self.errors += 1;
            }
        }
    }

    pub fn zone_broken(&mut self, zone: &Zone) {
        for (idx, f) in self.broken.iter_mut().enumerate() {
            if !guarded("zone_broken", idx, || f(zone)) {
                self.errors += 1;
            }
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("formed", &self.formed.len())
            .field("updated", &self.updated.len())
            .field("broken", &self.broken.len())
            .field("errors", &self.errors)
            .finish()
    }
}

fn guarded(event: &str, idx: usize, call: impl FnOnce() -> ObserverResult) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            log_observer_error(event, idx, &err);
            false
        }
        Err(payload) => {
            log_observer_error(event, idx, &format!("panic: {}", panic_message(payload.as_ref())));
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
