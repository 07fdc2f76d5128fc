use std::env;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_NAME: &str = "ANVIL_NAME";
pub const ENV_WORKERS: &str = "ANVIL_WORKERS";
pub const ENV_MAX_PENDING_DISPATCHES: &str = "ANVIL_MAX_PENDING_DISPATCHES";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("max_pending_dispatches must be at least 1 when set")]
    ZeroPendingLimit,

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Settings for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name used for the dispatcher's identity; workers are chained under it.
    pub name: String,

    /// Number of workers in the pool. Must be at least 1.
    pub workers: usize,

    /// Upper bound on matching units waiting for an idle worker.
    ///
    /// `None` spawns one matching unit per accepted task with no limit. With
    /// `Some(n)` the dispatch loop stops accepting tasks while `n` are waiting,
    /// which stalls submitters.
    pub max_pending_dispatches: Option<usize>,
}

impl DispatcherConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.max_pending_dispatches == Some(0) {
            return Err(ConfigError::ZeroPendingLimit);
        }
        Ok(())
    }

    /// Build config from `ANVIL_*` environment variables, falling back to the
    /// defaults for anything unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(name) = get(ENV_NAME) {
            config.name = name;
        }
        if let Some(raw) = get(ENV_WORKERS) {
            config.workers = parse_usize(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_PENDING_DISPATCHES) {
            config.max_pending_dispatches = Some(parse_usize(ENV_MAX_PENDING_DISPATCHES, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "dispatcher".to_string(),
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            max_pending_dispatches: None,
        }
    }
}

fn parse_usize(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_is_valid() {
        let config = DispatcherConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.max_pending_dispatches, None);
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::no_workers(0, None, Some(ConfigError::NoWorkers))]
    #[case::zero_limit(2, Some(0), Some(ConfigError::ZeroPendingLimit))]
    #[case::unbounded(1, None, None)]
    #[case::bounded(4, Some(4), None)]
    fn validate_cases(
        #[case] workers: usize,
        #[case] limit: Option<usize>,
        #[case] expected: Option<ConfigError>,
    ) {
        let config = DispatcherConfig {
            max_pending_dispatches: limit,
            ..DispatcherConfig::with_workers(workers)
        };
        assert_eq!(config.validate().err(), expected);
    }

    #[test]
    fn reads_all_keys() {
        let config = DispatcherConfig::from_lookup(lookup_from(&[
            (ENV_NAME, "smithy"),
            (ENV_WORKERS, "3"),
            (ENV_MAX_PENDING_DISPATCHES, " 16 "),
        ]))
        .unwrap();

        assert_eq!(config.name, "smithy");
        assert_eq!(config.workers, 3);
        assert_eq!(config.max_pending_dispatches, Some(16));
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config =
            DispatcherConfig::from_lookup(lookup_from(&[(ENV_NAME, ""), (ENV_WORKERS, "  ")]))
                .unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[rstest]
    #[case::not_a_number(ENV_WORKERS, "many")]
    #[case::negative(ENV_MAX_PENDING_DISPATCHES, "-1")]
    fn rejects_unparsable_values(#[case] key: &'static str, #[case] value: &str) {
        let err = DispatcherConfig::from_lookup(lookup_from(&[(key, value)])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                key,
                value: value.to_string()
            }
        );
    }

    #[test]
    fn zero_workers_from_env_fails_validation() {
        let err = DispatcherConfig::from_lookup(lookup_from(&[(ENV_WORKERS, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::NoWorkers);
    }

    #[test]
    fn deserializes_partial_document() {
        let config: DispatcherConfig = serde_json::from_str(r#"{ "workers": 2 }"#).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.name, "dispatcher");
    }
}
