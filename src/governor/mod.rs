//! Resource governor
//!
//! Shared gatekeeper for everything that touches the outside world. It owns:
//!
//! - a global request pacer (one shared next-slot instant)
//! - independent fail-fast concurrency ceilings per [`ResourceClass`]
//! - a consecutive-failure circuit breaker
//!
//! All state sits behind one short-held mutex that is never held across an await.
//! The governor is cheap to clone; clones share state.

mod breaker;
mod limiter;

pub use breaker::{BreakerState, CircuitBreaker};
pub use limiter::Pacer;

use crate::config::GovernorConfig;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Kinds of bounded resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Network,
    CacheIo,
    Persistence,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::Network,
        ResourceClass::CacheIo,
        ResourceClass::Persistence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Network => "network",
            ResourceClass::CacheIo => "cache-io",
            ResourceClass::Persistence => "persistence",
        }
    }

    fn index(self) -> usize {
        match self {
            ResourceClass::Network => 0,
            ResourceClass::CacheIo => 1,
            ResourceClass::Persistence => 2,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the governor
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GovernorError {
    #[error("Resource exhausted: {class} ceiling of {ceiling} reached")]
    Exhausted { class: ResourceClass, ceiling: usize },
}

/// Result type alias for governor operations
pub type GovernorResult<T> = std::result::Result<T, GovernorError>;

#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    active: usize,
    ceiling: usize,
    acquired: u64,
    refused: u64,
}

#[derive(Debug)]
struct State {
    counters: [Counter; 3],
    pacer: Pacer,
    breaker: CircuitBreaker,
    paced_requests: u64,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
}

/// Snapshot of one resource class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassStats {
    pub class: ResourceClass,
    pub active: usize,
    pub ceiling: usize,
    pub acquired: u64,
    pub refused: u64,
}

/// Snapshot of the whole governor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorStats {
    pub classes: Vec<ClassStats>,
    pub paced_requests: u64,
    pub consecutive_failures: u32,
    pub breaker_threshold: u32,
    pub tripped: bool,
}

impl GovernorStats {
    pub fn class(&self, class: ResourceClass) -> Option<&ClassStats> {
        self.classes.iter().find(|c| c.class == class)
    }
}

/// Shared resource gatekeeper
#[derive(Debug, Clone)]
pub struct Governor {
    inner: Arc<Inner>,
}

impl Governor {
    pub fn new(config: &GovernorConfig) -> Self {
        let mut counters = [Counter::default(); 3];
        counters[ResourceClass::Network.index()].ceiling = config.max_network;
        counters[ResourceClass::CacheIo.index()].ceiling = config.max_cache_io;
        counters[ResourceClass::Persistence.index()].ceiling = config.max_persistence;

        let state = State {
            counters,
            pacer: Pacer::new(
                Duration::from_millis(config.min_request_interval_ms),
                Duration::from_millis(config.max_request_interval_ms),
            ),
            breaker: CircuitBreaker::new(
                config.max_consecutive_errors,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            paced_requests: 0,
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes one permit of `class`, failing immediately when the ceiling is reached
    pub fn acquire(&self, class: ResourceClass) -> GovernorResult<Permit> {
        let mut state = self.lock();
        let counter = &mut state.counters[class.index()];

        if counter.active >= counter.ceiling {
            counter.refused += 1;
            return Err(GovernorError::Exhausted {
                class,
                ceiling: counter.ceiling,
            });
        }

        counter.active += 1;
        counter.acquired += 1;

        Ok(Permit {
            governor: self.clone(),
            class,
        })
    }

    /// Returns a permit explicitly; dropping it has the same effect
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    fn release_class(&self, class: ResourceClass) {
        let mut state = self.lock();
        let counter = &mut state.counters[class.index()];
        counter.active = counter.active.saturating_sub(1);
    }

    /// Waits for this caller's slot in the global request cadence
    pub async fn try_pace(&self) {
        let slot = {
            let mut state = self.lock();
            state.paced_requests += 1;
            state.pacer.reserve(Instant::now())
        };
        tokio::time::sleep_until(slot).await;
    }

    pub fn record_success(&self) {
        self.lock().breaker.record_success();
    }

    /// Closes the breaker and clears the failure count
    pub fn reset_breaker(&self) {
        self.lock().breaker.record_success();
    }

    /// Counts a failure; returns true if the breaker is tripped afterwards
    pub fn record_failure(&self) -> bool {
        self.lock().breaker.record_failure(Instant::now())
    }

    /// True while the breaker is open; a half-open breaker lets one attempt through
    pub fn is_tripped(&self) -> bool {
        self.lock().breaker.is_open(Instant::now())
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.lock().breaker.state(Instant::now())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().breaker.consecutive_failures()
    }

    pub fn ceiling(&self, class: ResourceClass) -> usize {
        self.lock().counters[class.index()].ceiling
    }

    pub fn active(&self, class: ResourceClass) -> usize {
        self.lock().counters[class.index()].active
    }

    pub fn stats(&self) -> GovernorStats {
        let state = self.lock();
        let now = Instant::now();
        GovernorStats {
            classes: ResourceClass::ALL
                .iter()
                .map(|&class| {
                    let c = state.counters[class.index()];
                    ClassStats {
                        class,
                        active: c.active,
                        ceiling: c.ceiling,
                        acquired: c.acquired,
                        refused: c.refused,
                    }
                })
                .collect(),
            paced_requests: state.paced_requests,
            consecutive_failures: state.breaker.consecutive_failures(),
            breaker_threshold: state.breaker.threshold(),
            tripped: state.breaker.is_open(now),
        }
    }
}

/// Held slot in one resource class; released on drop
#[derive(Debug)]
pub struct Permit {
    governor: Governor,
    class: ResourceClass,
}

impl Permit {
    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.governor.release_class(self.class);
    }
}
