//! Ledger parameters

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::Path;

use crate::blockchain::VerifyPolicy;

/// Largest meaningful difficulty: a SHA-256 hex digest has 64 characters
pub const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Leading zero hex characters required of every mined block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,

    /// Reward paid to the miner of each block, before fees
    #[serde(default = "default_base_reward")]
    pub base_reward: f64,

    /// Value created by the genesis block
    #[serde(default = "default_initial_supply")]
    pub initial_supply: f64,

    #[serde(default)]
    pub verification: VerifyPolicy,
}

fn default_difficulty() -> usize {
    2
}

fn default_base_reward() -> f64 {
    3.0
}

fn default_initial_supply() -> f64 {
    1000.0
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: default_difficulty(),
            base_reward: default_base_reward(),
            initial_supply: default_initial_supply(),
            verification: VerifyPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.difficulty
            )));
        }
        if !self.base_reward.is_finite() || self.base_reward < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "base_reward must be non-negative, got {}",
                self.base_reward
            )));
        }
        if !self.initial_supply.is_finite() || self.initial_supply < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "initial_supply must be non-negative, got {}",
                self.initial_supply
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.base_reward, 3.0);
        assert_eq!(config.initial_supply, 1000.0);
        assert_eq!(config.verification, VerifyPolicy::strict());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = LedgerConfig::from_toml_str(
            r#"
            difficulty = 3

            [verification]
            bind_owner = false
            "#,
        )
        .unwrap();

        assert_eq!(config.difficulty, 3);
        assert_eq!(config.base_reward, 3.0);
        assert!(!config.verification.bind_owner);
        assert!(config.verification.enforce_balance);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(LedgerConfig::from_toml_str("difficulty = 65").is_err());
        assert!(LedgerConfig::from_toml_str("base_reward = -1.0").is_err());
        assert!(LedgerConfig::from_toml_str("difficulty = \"high\"").is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = LedgerConfig::load("/nonexistent/ledger.toml").unwrap();
        assert_eq!(config, LedgerConfig::default());
    }
}
