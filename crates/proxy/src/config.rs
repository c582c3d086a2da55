//! Engine Configuration
//!
//! Central timeout, retry, and cache tuning for the engine. Everything
//! is overridable through `MUXMCP_*` environment variables; malformed
//! values fall back to the defaults rather than aborting startup.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Per-attempt bound on establishing a downstream connection (10s)
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Bound on one capability listing fetch (30s)
const DEFAULT_CAPABILITY_TIMEOUT_MS: u64 = 30_000;

/// Bound on one proxied tool/prompt/resource call (30s)
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Total connect attempts before giving up (first try included)
const DEFAULT_MAX_CONNECT_ATTEMPTS: usize = 5;

/// Base delay for exponential connect backoff (500ms)
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Ceiling on any single backoff delay (5s)
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// How long a cached capability snapshot stays fresh (5 minutes)
const DEFAULT_CAPS_CACHE_TTL_MS: u64 = 300_000;

/// Period of the background capability refresh loop (5 minutes)
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 300_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connect_timeout_ms: u64,
    pub capability_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub max_connect_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub caps_cache_ttl_ms: u64,
    pub refresh_interval_ms: u64,
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            connect_timeout_ms: env::var("MUXMCP_CONNECT_TIMEOUT_MS")
                .unwrap_or_else(|_| DEFAULT_CONNECT_TIMEOUT_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            capability_timeout_ms: env::var("MUXMCP_CAPABILITY_TIMEOUT_MS")
                .unwrap_or_else(|_| DEFAULT_CAPABILITY_TIMEOUT_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_CAPABILITY_TIMEOUT_MS),
            call_timeout_ms: env::var("MUXMCP_CALL_TIMEOUT_MS")
                .unwrap_or_else(|_| DEFAULT_CALL_TIMEOUT_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_CALL_TIMEOUT_MS),
            max_connect_attempts: env::var("MUXMCP_MAX_CONNECT_ATTEMPTS")
                .unwrap_or_else(|_| DEFAULT_MAX_CONNECT_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_CONNECT_ATTEMPTS),
            retry_base_delay_ms: env::var("MUXMCP_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| DEFAULT_RETRY_BASE_DELAY_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            retry_max_delay_ms: env::var("MUXMCP_RETRY_MAX_DELAY_MS")
                .unwrap_or_else(|_| DEFAULT_RETRY_MAX_DELAY_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
            caps_cache_ttl_ms: env::var("MUXMCP_CAPS_CACHE_TTL_MS")
                .unwrap_or_else(|_| DEFAULT_CAPS_CACHE_TTL_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_CAPS_CACHE_TTL_MS),
            refresh_interval_ms: env::var("MUXMCP_REFRESH_INTERVAL_MS")
                .unwrap_or_else(|_| DEFAULT_REFRESH_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_MS),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "MUXMCP_MAX_CONNECT_ATTEMPTS must be at least 1",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "MUXMCP_CONNECT_TIMEOUT_MS must be greater than 0",
            ));
        }
        if self.capability_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "MUXMCP_CAPABILITY_TIMEOUT_MS must be greater than 0",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "MUXMCP_CALL_TIMEOUT_MS must be greater than 0",
            ));
        }
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "MUXMCP_REFRESH_INTERVAL_MS must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_millis(self.capability_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn caps_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.caps_cache_ttl_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            capability_timeout_ms: DEFAULT_CAPABILITY_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            caps_cache_ttl_ms: DEFAULT_CAPS_CACHE_TTL_MS,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide; serialize tests that touch them.
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 8] = [
        "MUXMCP_CONNECT_TIMEOUT_MS",
        "MUXMCP_CAPABILITY_TIMEOUT_MS",
        "MUXMCP_CALL_TIMEOUT_MS",
        "MUXMCP_MAX_CONNECT_ATTEMPTS",
        "MUXMCP_RETRY_BASE_DELAY_MS",
        "MUXMCP_RETRY_MAX_DELAY_MS",
        "MUXMCP_CAPS_CACHE_TTL_MS",
        "MUXMCP_REFRESH_INTERVAL_MS",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults_when_env_unset() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        clear_env();

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.capability_timeout_ms, 30_000);
        assert_eq!(config.call_timeout_ms, 30_000);
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.retry_base_delay_ms, 500);
        assert_eq!(config.retry_max_delay_ms, 5_000);
        assert_eq!(config.caps_cache_ttl_ms, 300_000);
        assert_eq!(config.refresh_interval_ms, 300_000);
    }

    #[test]
    fn test_env_overrides_applied() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        clear_env();

        env::set_var("MUXMCP_CONNECT_TIMEOUT_MS", "2500");
        env::set_var("MUXMCP_MAX_CONNECT_ATTEMPTS", "3");
        env::set_var("MUXMCP_REFRESH_INTERVAL_MS", "60000");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout_ms, 2500);
        assert_eq!(config.max_connect_attempts, 3);
        assert_eq!(config.refresh_interval_ms, 60_000);
        // Untouched vars keep their defaults
        assert_eq!(config.call_timeout_ms, 30_000);

        clear_env();
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        clear_env();

        env::set_var("MUXMCP_CALL_TIMEOUT_MS", "not-a-number");
        env::set_var("MUXMCP_RETRY_BASE_DELAY_MS", "-5");

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.call_timeout_ms, 30_000);
        assert_eq!(config.retry_base_delay_ms, 500);

        clear_env();
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        clear_env();

        env::set_var("MUXMCP_MAX_CONNECT_ATTEMPTS", "0");
        let result = EngineConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        clear_env();
    }

    #[test]
    fn test_duration_accessors() {
        let config = EngineConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.caps_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.retry_base_delay(), Duration::from_millis(500));
    }
}
