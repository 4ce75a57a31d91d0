use std::collections::HashMap;
use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use playsync_core::models::ResolutionStrategy;
use playsync_core::{FanoutConfig, SyncConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub sync: SyncConfig,
    /// Capacity of the broadcast channel feeding SSE subscribers
    pub event_buffer: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "PLAYSYNC_BIND_ADDR", "127.0.0.1:8080");
        let defaults = SyncConfig::default();

        let conflict_window_ms =
            ranged(&lookup, "PLAYSYNC_CONFLICT_WINDOW_MS", 2_000, 100..=60_000)?;
        let divergence_threshold_secs =
            ranged(&lookup, "PLAYSYNC_DIVERGENCE_THRESHOLD_SECS", 5, 0..=3_600)?;
        let latency_budget_ms = ranged(&lookup, "PLAYSYNC_LATENCY_BUDGET_MS", 100, 1..=10_000)?;
        let history_limit = ranged(&lookup, "PLAYSYNC_HISTORY_LIMIT", 256, 16..=10_000)?;
        let platform_idle_secs = ranged(&lookup, "PLAYSYNC_PLATFORM_IDLE_SECS", 60, 5..=86_400)?;
        let session_idle_secs =
            ranged(&lookup, "PLAYSYNC_SESSION_IDLE_SECS", 1_800, 60..=604_800)?;
        let cleanup_interval_secs =
            ranged(&lookup, "PLAYSYNC_CLEANUP_INTERVAL_SECS", 30, 1..=3_600)?;
        let fanout_max_attempts = ranged(&lookup, "PLAYSYNC_FANOUT_MAX_ATTEMPTS", 3, 1..=10)?;
        let fanout_backoff_ms = ranged(&lookup, "PLAYSYNC_FANOUT_BACKOFF_MS", 50, 1..=10_000)?;
        let fanout_workers = ranged(&lookup, "PLAYSYNC_FANOUT_WORKERS", 4, 1..=64)?;

        let default_strategy = optional_trimmed(&lookup, "PLAYSYNC_DEFAULT_STRATEGY")
            .map(|value| value.parse::<ResolutionStrategy>())
            .transpose()
            .map_err(|_| {
                ConfigError::Invalid(
                    "PLAYSYNC_DEFAULT_STRATEGY must be one of latest, authority, average, manual"
                        .to_string(),
                )
            })?
            .unwrap_or(defaults.default_strategy);

        let implicit_registration = optional_trimmed(&lookup, "PLAYSYNC_IMPLICIT_REGISTRATION")
            .map(|value| parse_bool(&value))
            .transpose()
            .map_err(|_| {
                ConfigError::Invalid(
                    "PLAYSYNC_IMPLICIT_REGISTRATION must be true or false".to_string(),
                )
            })?
            .unwrap_or(defaults.implicit_registration);

        let sync = SyncConfig {
            conflict_window: Duration::from_millis(conflict_window_ms),
            divergence_threshold_secs,
            latency_budget: Duration::from_millis(latency_budget_ms),
            history_limit: usize::try_from(history_limit).map_err(|_| {
                ConfigError::Invalid("PLAYSYNC_HISTORY_LIMIT is too large".to_string())
            })?,
            platform_idle_window: Duration::from_secs(platform_idle_secs),
            session_idle_timeout: Duration::from_secs(session_idle_secs),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
            default_strategy,
            implicit_registration,
            fanout: FanoutConfig {
                max_attempts: u32::try_from(fanout_max_attempts).map_err(|_| {
                    ConfigError::Invalid("PLAYSYNC_FANOUT_MAX_ATTEMPTS is too large".to_string())
                })?,
                initial_backoff: Duration::from_millis(fanout_backoff_ms),
                workers: usize::try_from(fanout_workers).map_err(|_| {
                    ConfigError::Invalid("PLAYSYNC_FANOUT_WORKERS is too large".to_string())
                })?,
                ..defaults.fanout.clone()
            },
            ..defaults
        };

        Ok(Self {
            bind_addr,
            event_buffer: sync.fanout.queue_capacity,
            sync,
        })
    }
}

fn ranged(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn parse_bool(value: &str) -> Result<bool, ()> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(()),
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<AppConfig, ConfigError> {
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_defaults_match_engine_defaults() {
        let config = config_from(&HashMap::new()).unwrap();
        let defaults = SyncConfig::default();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.sync.conflict_window, defaults.conflict_window);
        assert_eq!(
            config.sync.divergence_threshold_secs,
            defaults.divergence_threshold_secs
        );
        assert_eq!(config.sync.latency_budget, defaults.latency_budget);
        assert_eq!(config.sync.default_strategy, ResolutionStrategy::Latest);
        assert!(config.sync.implicit_registration);
    }

    #[test]
    fn config_reads_overrides() {
        let mut map = HashMap::new();
        map.insert("PLAYSYNC_BIND_ADDR", " 0.0.0.0:9000 ");
        map.insert("PLAYSYNC_CONFLICT_WINDOW_MS", "500");
        map.insert("PLAYSYNC_DEFAULT_STRATEGY", "Average");
        map.insert("PLAYSYNC_IMPLICIT_REGISTRATION", "false");
        map.insert("PLAYSYNC_FANOUT_MAX_ATTEMPTS", "5");
        map.insert("PLAYSYNC_FANOUT_WORKERS", "2");

        let config = config_from(&map).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.sync.conflict_window, Duration::from_millis(500));
        assert_eq!(config.sync.default_strategy, ResolutionStrategy::Average);
        assert!(!config.sync.implicit_registration);
        assert_eq!(config.sync.fanout.max_attempts, 5);
        assert_eq!(config.sync.fanout.workers, 2);
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let mut map = HashMap::new();
        map.insert("PLAYSYNC_CONFLICT_WINDOW_MS", "50");
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("PLAYSYNC_CONFLICT_WINDOW_MS"));

        let mut map = HashMap::new();
        map.insert("PLAYSYNC_HISTORY_LIMIT", "many");
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("PLAYSYNC_HISTORY_LIMIT"));
    }

    #[test]
    fn config_rejects_unknown_strategy_and_bool() {
        let mut map = HashMap::new();
        map.insert("PLAYSYNC_DEFAULT_STRATEGY", "random");
        assert!(config_from(&map).is_err());

        let mut map = HashMap::new();
        map.insert("PLAYSYNC_IMPLICIT_REGISTRATION", "maybe");
        assert!(config_from(&map).is_err());
    }
}
