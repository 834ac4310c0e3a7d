//! Configuration Module
//!
//! Aggregates the per-component configuration structs and lets a host
//! application load them from environment variables. The components
//! themselves never read the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::authz::DecisionCacheConfig;
use crate::breaker::BreakerConfig;
use crate::cache::CacheConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::retry::RetryConfig;

/// Configuration for every component in the crate.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub authz: DecisionCacheConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// Unset variables keep their defaults; set but unparseable ones are an
    /// error.
    ///
    /// # Environment Variables
    /// - `BULWARK_CACHE_CAPACITY` - Maximum cache entries (default: 1000)
    /// - `BULWARK_CACHE_TTL_SECS` - Default TTL in seconds (default: 300)
    /// - `BULWARK_CACHE_CLEANUP_SECS` - Sweep interval in seconds (default: TTL / 2)
    /// - `BULWARK_BREAKER_NAME` - Breaker name (default: "default")
    /// - `BULWARK_BREAKER_MAX_REQUESTS` - Half-open probes (default: 1)
    /// - `BULWARK_BREAKER_INTERVAL_SECS` - Closed counting window, 0 = never reset (default: 0)
    /// - `BULWARK_BREAKER_TIMEOUT_SECS` - Open duration (default: 60)
    /// - `BULWARK_BREAKER_FAILURE_THRESHOLD` - Consecutive failures to trip (default: 5)
    /// - `BULWARK_RETRY_MAX_RETRIES` - Retries after the first attempt (default: 3)
    /// - `BULWARK_RETRY_INITIAL_MS` - First backoff in milliseconds (default: 100)
    /// - `BULWARK_RETRY_MAX_MS` - Backoff cap in milliseconds (default: 5000)
    /// - `BULWARK_RETRY_MULTIPLIER` - Backoff growth factor (default: 2.0)
    /// - `BULWARK_AUTHZ_TTL_SECS` - Decision cache TTL in seconds (default: 300)
    /// - `BULWARK_AUTHZ_CLEANUP_SECS` - Decision cache sweep interval, 0 = no sweep (default: TTL / 2)
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let mut config = Config::default();

        if let Some(capacity) = vars.parse::<usize>("BULWARK_CACHE_CAPACITY")? {
            if capacity == 0 {
                return Err(ConfigError::OutOfRange {
                    name: "BULWARK_CACHE_CAPACITY",
                    reason: "must be at least 1",
                });
            }
            config.cache.capacity = capacity;
        }
        if let Some(ttl) = vars.secs("BULWARK_CACHE_TTL_SECS")? {
            config.cache.default_ttl = ttl;
        }
        config.cache.cleanup_interval = vars.secs("BULWARK_CACHE_CLEANUP_SECS")?;

        if let Some(name) = (vars.lookup)("BULWARK_BREAKER_NAME") {
            config.breaker.name = name;
        }
        if let Some(max_requests) = vars.parse("BULWARK_BREAKER_MAX_REQUESTS")? {
            config.breaker.max_requests = max_requests;
        }
        if let Some(interval) = vars.secs("BULWARK_BREAKER_INTERVAL_SECS")? {
            config.breaker.interval = interval;
        }
        if let Some(timeout) = vars.secs("BULWARK_BREAKER_TIMEOUT_SECS")? {
            config.breaker.timeout = timeout;
        }
        if let Some(threshold) = vars.parse("BULWARK_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = threshold;
        }

        if let Some(max_retries) = vars.parse("BULWARK_RETRY_MAX_RETRIES")? {
            config.retry.max_retries = max_retries;
        }
        if let Some(initial) = vars.millis("BULWARK_RETRY_INITIAL_MS")? {
            config.retry.initial_interval = initial;
        }
        if let Some(max) = vars.millis("BULWARK_RETRY_MAX_MS")? {
            config.retry.max_interval = max;
        }
        if let Some(multiplier) = vars.parse::<f64>("BULWARK_RETRY_MULTIPLIER")? {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(ConfigError::OutOfRange {
                    name: "BULWARK_RETRY_MULTIPLIER",
                    reason: "must be a finite number >= 1.0",
                });
            }
            config.retry.multiplier = multiplier;
        }

        if let Some(ttl) = vars.secs("BULWARK_AUTHZ_TTL_SECS")? {
            config.authz.ttl = ttl;
        }
        config.authz.cleanup_interval = vars.secs("BULWARK_AUTHZ_CLEANUP_SECS")?;

        Ok(config)
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, name: &'static str) -> ConfigResult<Option<T>> {
        match (self.lookup)(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        }
    }

    fn secs(&self, name: &'static str) -> ConfigResult<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_secs))
    }

    fn millis(&self, name: &'static str) -> ConfigResult<Option<Duration>> {
        Ok(self.parse::<u64>(name)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ConfigResult<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(300));
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.authz.ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_config_from_empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.authz, DecisionCacheConfig::default());
        assert_eq!(config.breaker.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_config_overrides() {
        let config = load(&[
            ("BULWARK_CACHE_CAPACITY", "50"),
            ("BULWARK_CACHE_TTL_SECS", "10"),
            ("BULWARK_CACHE_CLEANUP_SECS", "2"),
            ("BULWARK_BREAKER_NAME", "sso"),
            ("BULWARK_BREAKER_TIMEOUT_SECS", "30"),
            ("BULWARK_BREAKER_FAILURE_THRESHOLD", " 3 "),
            ("BULWARK_RETRY_INITIAL_MS", "250"),
            ("BULWARK_RETRY_MULTIPLIER", "1.5"),
            ("BULWARK_AUTHZ_TTL_SECS", "60"),
            ("BULWARK_AUTHZ_CLEANUP_SECS", "30"),
        ])
        .unwrap();

        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(10));
        assert_eq!(config.cache.cleanup_interval, Some(Duration::from_secs(2)));
        assert_eq!(config.breaker.name, "sso");
        assert_eq!(config.breaker.timeout, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.retry.initial_interval, Duration::from_millis(250));
        assert_eq!(config.retry.multiplier, 1.5);
        assert_eq!(config.authz.ttl, Duration::from_secs(60));
        assert_eq!(config.authz.cleanup_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_config_rejects_garbage() {
        let err = load(&[("BULWARK_RETRY_MAX_RETRIES", "many")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "BULWARK_RETRY_MAX_RETRIES",
                value: "many".to_string(),
            }
        );
    }

    #[test]
    fn test_config_rejects_out_of_range() {
        assert!(matches!(
            load(&[("BULWARK_CACHE_CAPACITY", "0")]),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            load(&[("BULWARK_RETRY_MULTIPLIER", "0.5")]),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
