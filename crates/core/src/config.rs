//! Engine configuration
//!
//! Configuration *loading* (files, YAML) is an external collaborator; the
//! engine only consumes a flat key -> value view of whatever the host loaded.
//! Unknown keys are ignored so hosts can share one config map across
//! components.

use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Tunables for the persistence engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How often the lazy-reference sweeper wakes up.
    pub sweep_interval: Duration,
    /// Loaded lazy references idle longer than this are unloaded.
    pub lazy_idle_timeout: Duration,
    /// First object id handed out by the id provider.
    pub oid_base: u64,
    /// Minimum similarity score for a legacy field mapping candidate.
    pub legacy_match_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
            lazy_idle_timeout: Duration::from_secs(60),
            oid_base: 1_000_000,
            legacy_match_threshold: 0.6,
        }
    }
}

impl EngineConfig {
    /// Build a config from a key/value accessor, starting from defaults.
    ///
    /// Recognized keys:
    /// - `sweeper.interval_ms`
    /// - `lazy.idle_timeout_ms`
    /// - `oid.base`
    /// - `legacy.match_threshold`
    ///
    /// Unknown keys are ignored; malformed values for known keys are a
    /// [`ConfigError`].
    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = kv.get("sweeper.interval_ms") {
            config.sweep_interval = Duration::from_millis(parse_u64("sweeper.interval_ms", v)?);
        }
        if let Some(v) = kv.get("lazy.idle_timeout_ms") {
            config.lazy_idle_timeout = Duration::from_millis(parse_u64("lazy.idle_timeout_ms", v)?);
        }
        if let Some(v) = kv.get("oid.base") {
            config.oid_base = parse_u64("oid.base", v)?;
        }
        if let Some(v) = kv.get("legacy.match_threshold") {
            let threshold: f64 = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "legacy.match_threshold".to_string(),
                value: v.clone(),
            })?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::InvalidValue {
                    key: "legacy.match_threshold".to_string(),
                    value: v.clone(),
                }
                .into());
            }
            config.legacy_match_threshold = threshold;
        }

        Ok(config)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.oid_base, 1_000_000);
    }

    #[test]
    fn test_from_kv_overrides() {
        let mut kv = HashMap::new();
        kv.insert("sweeper.interval_ms".to_string(), "250".to_string());
        kv.insert("lazy.idle_timeout_ms".to_string(), "5000".to_string());
        kv.insert("oid.base".to_string(), "42".to_string());
        kv.insert("legacy.match_threshold".to_string(), "0.8".to_string());

        let config = EngineConfig::from_kv(&kv).unwrap();
        assert_eq!(config.sweep_interval, Duration::from_millis(250));
        assert_eq!(config.lazy_idle_timeout, Duration::from_millis(5000));
        assert_eq!(config.oid_base, 42);
        assert!((config.legacy_match_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_kv_ignores_unknown_keys() {
        let mut kv = HashMap::new();
        kv.insert("some.other.component".to_string(), "whatever".to_string());
        let config = EngineConfig::from_kv(&kv).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_kv_rejects_malformed() {
        let mut kv = HashMap::new();
        kv.insert("oid.base".to_string(), "not-a-number".to_string());
        assert!(EngineConfig::from_kv(&kv).is_err());
    }

    #[test]
    fn test_from_kv_rejects_out_of_range_threshold() {
        let mut kv = HashMap::new();
        kv.insert("legacy.match_threshold".to_string(), "1.5".to_string());
        assert!(EngineConfig::from_kv(&kv).is_err());
    }
}
