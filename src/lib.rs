//! Bulwark - resilience and caching primitives
//!
//! Provides a generic TTL cache, a generation-tagged circuit breaker, an
//! exponential-backoff retry helper and a per-user authorization decision
//! cache.

pub mod authz;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
pub mod tasks;

pub use authz::{DecisionCache, DecisionCacheConfig, PermissionLookup};
pub use breaker::{BreakerConfig, CircuitBreaker, State};
pub use cache::{CacheConfig, TtlCache};
pub use config::Config;
pub use error::{BreakerError, RetryError};
pub use retry::{execute_with_retry, RetryConfig};
