//! Breaker Configuration Module

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{Counts, State};

/// Decides, after a failure in the closed state, whether to open the circuit.
pub type TripPredicate = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Called with `(name, from, to)` on every state transition.
pub type StateChangeHook = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Timeout used when a zero timeout is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// == Breaker Config ==
/// Construction parameters for a [`CircuitBreaker`](crate::breaker::CircuitBreaker).
#[derive(Clone)]
pub struct BreakerConfig {
    /// Name reported to the state change hook and in logs
    pub name: String,
    /// Probe requests allowed while half-open, and successes needed to
    /// close again. Zero is treated as 1.
    pub max_requests: u32,
    /// Closed-state counting window; zero disables periodic resets
    pub interval: Duration,
    /// Time spent open before probing; zero means [`DEFAULT_TIMEOUT`]
    pub timeout: Duration,
    /// Consecutive failures that open the circuit when no custom
    /// predicate is set
    pub failure_threshold: u32,
    pub ready_to_trip: Option<TripPredicate>,
    pub on_state_change: Option<StateChangeHook>,
}

impl BreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Replaces the default consecutive-failures predicate.
    pub fn with_ready_to_trip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Some(Arc::new(predicate));
        self
    }

    pub fn with_on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_requests: 1,
            interval: Duration::ZERO,
            timeout: DEFAULT_TIMEOUT,
            failure_threshold: 5,
            ready_to_trip: None,
            on_state_change: None,
        }
    }
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("name", &self.name)
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("failure_threshold", &self.failure_threshold)
            .field("ready_to_trip", &self.ready_to_trip.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}
