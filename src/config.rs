//! Engine configuration loaded from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CLEARING_NUM_ASSETS` | 4 |
//! | `CLEARING_TAX_RATE` | 10 |
//! | `CLEARING_SMOOTH_MULT` | 10 |
//! | `CLEARING_WORKER_THREADS` | 0 (rayon default) |
//! | `CLEARING_PRODUCTION_BATCH` | 3 |
//! | `CLEARING_VALIDATION_BATCH` | 5 |

use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of traded assets. Markets exist for every ordered pair.
    pub num_assets: u32,
    /// Fee rate exponent: a fee of `2^-tax_rate` is withheld on settlement.
    pub tax_rate: u8,
    /// Width of the smoothing band: `lower = upper * (1 - 2^-smooth_mult)`.
    pub smooth_mult: u8,
    /// Size of the clearing thread pool. `0` lets rayon decide.
    pub worker_threads: usize,
    /// Work units handed to one task during production clearing.
    pub production_batch_size: usize,
    /// Work units handed to one task during validation.
    pub validation_batch_size: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_assets: 4,
            tax_rate: 10,
            smooth_mult: 10,
            worker_threads: 0,
            production_batch_size: 3,
            validation_batch_size: 5,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            num_assets: parse_or(&env_map, "CLEARING_NUM_ASSETS", defaults.num_assets)?,
            tax_rate: parse_or(&env_map, "CLEARING_TAX_RATE", defaults.tax_rate)?,
            smooth_mult: parse_or(&env_map, "CLEARING_SMOOTH_MULT", defaults.smooth_mult)?,
            worker_threads: parse_or(&env_map, "CLEARING_WORKER_THREADS", defaults.worker_threads)?,
            production_batch_size: parse_or(
                &env_map,
                "CLEARING_PRODUCTION_BATCH",
                defaults.production_batch_size,
            )?,
            validation_batch_size: parse_or(
                &env_map,
                "CLEARING_VALIDATION_BATCH",
                defaults.validation_batch_size,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_assets < 2 {
            return Err(ConfigError::InvalidValue(
                "CLEARING_NUM_ASSETS".to_string(),
                "at least two assets are required".to_string(),
            ));
        }
        if self.tax_rate == 0 || self.tax_rate > 63 {
            return Err(ConfigError::InvalidValue(
                "CLEARING_TAX_RATE".to_string(),
                format!("must be in 1..=63, got {}", self.tax_rate),
            ));
        }
        if self.smooth_mult > 63 {
            return Err(ConfigError::InvalidValue(
                "CLEARING_SMOOTH_MULT".to_string(),
                format!("must be at most 63, got {}", self.smooth_mult),
            ));
        }
        if self.production_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "CLEARING_PRODUCTION_BATCH".to_string(),
                "must be positive".to_string(),
            ));
        }
        if self.validation_batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "CLEARING_VALIDATION_BATCH".to_string(),
                "must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("cannot parse {:?}", raw))
        }),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_env_map(HashMap::new()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_env_map(env(&[
            ("CLEARING_NUM_ASSETS", "7"),
            ("CLEARING_TAX_RATE", "15"),
            ("CLEARING_SMOOTH_MULT", "0"),
            ("CLEARING_WORKER_THREADS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.num_assets, 7);
        assert_eq!(config.tax_rate, 15);
        assert_eq!(config.smooth_mult, 0);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.validation_batch_size, 5);
    }

    #[test]
    fn test_unparseable_value() {
        let result = EngineConfig::from_env_map(env(&[("CLEARING_TAX_RATE", "ten")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(ref k, _)) if k == "CLEARING_TAX_RATE"));
    }

    #[test]
    fn test_single_asset_rejected() {
        let result = EngineConfig::from_env_map(env(&[("CLEARING_NUM_ASSETS", "1")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(..))));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let result = EngineConfig::from_env_map(env(&[("CLEARING_VALIDATION_BATCH", "0")]));
        assert!(result.is_err());
    }
}
