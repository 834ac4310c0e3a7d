//! Circuit Breaker Module
//!
//! Provides a three-state circuit breaker (closed, half-open, open) whose
//! counting windows are tagged with a generation number.

mod circuit;
mod config;
mod state;


pub use circuit::CircuitBreaker;
pub use config::{BreakerConfig, StateChangeHook, TripPredicate, DEFAULT_TIMEOUT};
pub use state::{Counts, State};
