//! Environment-discovered configuration for the simulation engine.

use serde::{Deserialize, Serialize};

const DEFAULT_CACHE_SIZE_SM_RATES: usize = 100_000;
const DEFAULT_CACHE_SIZE_SM_STOPPED_STATES: usize = 1;

/// Bounds for the [`crate::state_machine`] memoization caches.
///
/// Read from `CACHE_SIZE_SM_RATES` and `CACHE_SIZE_SM_STOPPED_STATES` when
/// built with [`StateMachineCacheConfig::from_env`]; both fall back to a
/// generous default when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineCacheConfig {
    pub rates: usize,
    pub stopped_states: usize,
}

impl Default for StateMachineCacheConfig {
    fn default() -> Self {
        Self {
            rates: DEFAULT_CACHE_SIZE_SM_RATES,
            stopped_states: DEFAULT_CACHE_SIZE_SM_STOPPED_STATES,
        }
    }
}

impl StateMachineCacheConfig {
    /// Reads cache sizes from the environment, falling back to defaults for
    /// any variable that is unset or fails to parse as a non-negative
    /// integer.
    pub fn from_env() -> Self {
        Self {
            rates: read_env_usize("CACHE_SIZE_SM_RATES", DEFAULT_CACHE_SIZE_SM_RATES),
            stopped_states: read_env_usize(
                "CACHE_SIZE_SM_STOPPED_STATES",
                DEFAULT_CACHE_SIZE_SM_STOPPED_STATES,
            ),
        }
    }
}

fn read_env_usize(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            log::debug!("{var} unset or invalid, using default {default}");
            default
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_one_hundred_thousand_and_one() {
        let config = StateMachineCacheConfig::default();
        assert_eq!(config.rates, 100_000);
        assert_eq!(config.stopped_states, 1);
    }

    #[test]
    fn from_env_falls_back_on_missing_var() {
        let _ = env_logger::builder().is_test(true).try_init();
        std::env::remove_var("CACHE_SIZE_SM_RATES");
        let config = StateMachineCacheConfig::from_env();
        assert_eq!(config.rates, 100_000);
    }
}
