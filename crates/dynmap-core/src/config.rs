//! Shared configuration defaults and environment lookups.
//!
//! All crates read their tunables through this module so that the defaults
//! and the environment variable names live in one place.

use serde::{Deserialize, Serialize};

/// Default values.
pub mod defaults {
    /// Maximum number of output records processed concurrently in one run.
    pub const MAX_CONCURRENT_DISPATCH: usize = 4;
    /// Number of snooped payloads kept per mapping rule.
    pub const SNOOP_CAPACITY: usize = 10;
    /// Fragment and type stamped on devices created on demand.
    pub const TEST_DEVICE_TYPE: &str = "d11r_testDevice";
    /// Default filter directive for the CLI logger.
    pub const LOG_FILTER: &str = "dynmap=info";
}

/// Environment variable names.
pub mod env_vars {
    pub const MAX_CONCURRENT_DISPATCH: &str = "DYNMAP_MAX_CONCURRENT_DISPATCH";
    pub const SNOOP_CAPACITY: &str = "DYNMAP_SNOOP_CAPACITY";
    pub const TEST_DEVICE_TYPE: &str = "DYNMAP_TEST_DEVICE_TYPE";
    pub const GENERATE_TIME: &str = "DYNMAP_GENERATE_TIME";
    /// Emit JSON log lines instead of the compact human format.
    pub const LOG_JSON: &str = "DYNMAP_LOG_JSON";

    /// Read the dispatch concurrency from the environment, or the default.
    pub fn max_concurrent_dispatch() -> usize {
        std::env::var(MAX_CONCURRENT_DISPATCH)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(super::defaults::MAX_CONCURRENT_DISPATCH)
    }

    /// Read the snoop ring capacity from the environment, or the default.
    pub fn snoop_capacity() -> usize {
        std::env::var(SNOOP_CAPACITY)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(super::defaults::SNOOP_CAPACITY)
    }

    pub fn test_device_type() -> String {
        std::env::var(TEST_DEVICE_TYPE)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| super::defaults::TEST_DEVICE_TYPE.to_string())
    }

    pub fn generate_time() -> bool {
        std::env::var(GENERATE_TIME)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true)
    }

    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Tunables for one mapping engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Upper bound on output records built and dispatched at the same time.
    pub max_concurrent_dispatch: usize,
    /// Capacity of the snooped sample ring.
    pub snoop_capacity: usize,
    /// Type used for devices created on demand.
    pub test_device_type: String,
    /// Synthesize a `time` substitution when the rule maps none.
    pub generate_time: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatch: defaults::MAX_CONCURRENT_DISPATCH,
            snoop_capacity: defaults::SNOOP_CAPACITY,
            test_device_type: defaults::TEST_DEVICE_TYPE.to_string(),
            generate_time: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `DYNMAP_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_dispatch: env_vars::max_concurrent_dispatch(),
            snoop_capacity: env_vars::snoop_capacity(),
            test_device_type: env_vars::test_device_type(),
            generate_time: env_vars::generate_time(),
        }
    }

    pub fn with_max_concurrent_dispatch(mut self, n: usize) -> Self {
        self.max_concurrent_dispatch = n.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_dispatch, 4);
        assert_eq!(config.snoop_capacity, 10);
        assert_eq!(config.test_device_type, "d11r_testDevice");
        assert!(config.generate_time);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"maxConcurrentDispatch": 1}"#).unwrap();
        assert_eq!(config.max_concurrent_dispatch, 1);
        assert_eq!(config.snoop_capacity, 10);
    }

    #[test]
    fn test_concurrency_never_zero() {
        let config = EngineConfig::default().with_max_concurrent_dispatch(0);
        assert_eq!(config.max_concurrent_dispatch, 1);
    }
}
