use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{common::ConfigError, network::Amount};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchConfig {
    #[serde(default = "default_balance")]
    pub initial_balance: i64,
    /// Address this branch listens on for its peers. Port 0 picks a free port;
    /// the bound address is what gets registered.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_observer_addr")]
    pub observer_addr: String,
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
    #[serde(default = "default_n_branches")]
    pub n_branches: usize,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub tick_ms: u64,
    /// Chance of attempting a transfer on each tick.
    pub probability: f64,
    pub min_amount: Amount,
    pub max_amount: Amount,
    /// Successful sends per peer before the sender loop stops. `None` runs forever.
    pub max_sends: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObserverConfig {
    #[serde(default = "default_observer_addr")]
    pub listen_addr: String,
    #[serde(default = "default_n_branches")]
    pub n_branches: usize,
    #[serde(default = "default_money_unit")]
    pub money_unit: String,
}

fn default_balance() -> i64 {
    10_000_000
}

fn default_listen_addr() -> String {
    "127.0.0.1:0".to_string()
}

fn default_observer_addr() -> String {
    "127.0.0.1:11000".to_string()
}

fn default_registry_path() -> String {
    "bank/bank.json".to_string()
}

fn default_n_branches() -> usize {
    2
}

fn default_money_unit() -> String {
    "Rupees".to_string()
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_balance(),
            listen_addr: default_listen_addr(),
            observer_addr: default_observer_addr(),
            registry_path: default_registry_path(),
            n_branches: default_n_branches(),
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            probability: 0.3,
            min_amount: 1,
            max_amount: 1_000,
            max_sends: Some(1_000),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            timeout_ms: 120_000,
        }
    }
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_observer_addr(),
            n_branches: default_n_branches(),
            money_unit: default_money_unit(),
        }
    }
}

impl BranchConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: BranchConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_branches == 0 {
            return Err(ConfigError::Invalid("n_branches must be at least 1".into()));
        }
        if self.initial_balance < 0 {
            return Err(ConfigError::Invalid("initial_balance must not be negative".into()));
        }
        self.transfer.validate()
    }
}

impl TransferConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(ConfigError::Invalid(format!(
                "probability {} is outside [0, 1]",
                self.probability
            )));
        }
        if self.min_amount == 0 || self.min_amount > self.max_amount {
            return Err(ConfigError::Invalid(format!(
                "amount range [{}, {}] is empty or includes zero",
                self.min_amount, self.max_amount
            )));
        }
        Ok(())
    }
}

impl ObserverConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: ObserverConfig = serde_json::from_str(&raw)?;
        if config.n_branches == 0 {
            return Err(ConfigError::Invalid("n_branches must be at least 1".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_simulation_parameters() {
        let config = BranchConfig::default();

        assert_eq!(config.initial_balance, 10_000_000);
        assert_eq!(config.transfer.probability, 0.3);
        assert_eq!(config.transfer.min_amount, 1);
        assert_eq!(config.transfer.max_amount, 1_000);
        assert_eq!(config.transfer.max_sends, Some(1_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: BranchConfig =
            serde_json::from_str(r#"{"initial_balance": 500, "n_branches": 3}"#).unwrap();

        assert_eq!(config.initial_balance, 500);
        assert_eq!(config.n_branches, 3);
        assert_eq!(config.observer_addr, "127.0.0.1:11000");
        assert_eq!(config.transfer.tick_ms, 1_000);
    }

    #[test]
    fn test_partial_nested_sections_fill_defaults() {
        let config: BranchConfig = serde_json::from_str(
            r#"{"transfer": {"tick_ms": 10}, "retry": {"timeout_ms": 500}}"#,
        )
        .unwrap();

        assert_eq!(config.transfer.tick_ms, 10);
        assert_eq!(config.transfer.probability, 0.3);
        assert_eq!(config.transfer.max_sends, Some(1_000));
        assert_eq!(config.retry.timeout_ms, 500);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_amount_range() {
        let mut config = BranchConfig::default();
        config.transfer.min_amount = 10;
        config.transfer.max_amount = 5;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_probability_out_of_range() {
        let mut config = BranchConfig::default();
        config.transfer.probability = 1.5;

        assert!(config.validate().is_err());
    }
}
