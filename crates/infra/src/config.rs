//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! `EngineConfig::load` reads the file named by `OSAS_CONFIG` (if set) and
//! then applies single-value environment overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use osas_core::Rate;
use osas_repayment::RepaymentPolicy;
use osas_risk::RiskPolicy;

use crate::jobs::RetryPolicy;

pub const CONFIG_PATH_VAR: &str = "OSAS_CONFIG";
pub const CREDIT_TERMS_DAYS_VAR: &str = "OSAS_CREDIT_TERMS_DAYS";
pub const RESERVATION_TTL_SECS_VAR: &str = "OSAS_RESERVATION_TTL_SECS";
pub const PLATFORM_FEE_BPS_VAR: &str = "OSAS_PLATFORM_FEE_BPS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {var}: {value:?}")]
    InvalidOverride { var: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditConfig {
    /// Days between commit and the obligation's due date.
    pub credit_terms_days: u32,
    /// Age after which an uncommitted reservation is auto-released.
    pub reservation_ttl_secs: i64,
    /// Apply risk-recommended limit decreases without a human approver.
    pub auto_decrease_limits: bool,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            credit_terms_days: 30,
            reservation_ttl_secs: 72 * 60 * 60,
            auto_decrease_limits: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub platform_fee_bps: u32,
}

impl SettlementConfig {
    pub fn fee_rate(&self) -> Rate {
        Rate::from_bps(self.platform_fee_bps)
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            platform_fee_bps: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Lower bounds (in days overdue) of each overdue bucket, ascending.
    pub bucket_thresholds_days: Vec<u32>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            bucket_thresholds_days: vec![1, 8, 31],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub credit: CreditConfig,
    pub repayment: RepaymentPolicy,
    pub settlement: SettlementConfig,
    pub recovery: RecoveryConfig,
    pub risk: RiskPolicy,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    /// Load from `OSAS_CONFIG` (optional) plus environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup(CREDIT_TERMS_DAYS_VAR) {
            self.credit.credit_terms_days = parse_var(CREDIT_TERMS_DAYS_VAR, &v)?;
        }
        if let Some(v) = lookup(RESERVATION_TTL_SECS_VAR) {
            self.credit.reservation_ttl_secs = parse_var(RESERVATION_TTL_SECS_VAR, &v)?;
        }
        if let Some(v) = lookup(PLATFORM_FEE_BPS_VAR) {
            self.settlement.platform_fee_bps = parse_var(PLATFORM_FEE_BPS_VAR, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credit.reservation_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(
                "credit.reservation_ttl_secs must be positive".to_string(),
            ));
        }
        if self.settlement.platform_fee_bps > 10_000 {
            return Err(ConfigError::Invalid(
                "settlement.platform_fee_bps cannot exceed 10000".to_string(),
            ));
        }
        if !self.repayment.allows_tenure(self.repayment.emi_default_tenure_months) {
            return Err(ConfigError::Invalid(
                "repayment.emi_default_tenure_months must be between 1 and emi_max_tenure_months"
                    .to_string(),
            ));
        }
        let thresholds = &self.recovery.bucket_thresholds_days;
        if thresholds.is_empty() || thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid(
                "recovery.bucket_thresholds_days must be non-empty and strictly ascending"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            var,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.credit.credit_terms_days, 30);
        assert_eq!(config.repayment.penalty_cap_days, 5);
        assert_eq!(config.recovery.bucket_thresholds_days, vec![1, 8, 31]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config =
            EngineConfig::from_json(r#"{"repayment": {"max_skips_allowed": 4}}"#).unwrap();
        assert_eq!(config.repayment.max_skips_allowed, 4);
        assert_eq!(config.repayment.skip_extension_days, 7);
        assert_eq!(config.settlement.platform_fee_bps, 200);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|var| match var {
                CREDIT_TERMS_DAYS_VAR => Some("45".to_string()),
                PLATFORM_FEE_BPS_VAR => Some(" 150 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.credit.credit_terms_days, 45);
        assert_eq!(config.settlement.platform_fee_bps, 150);
        assert_eq!(config.credit.reservation_ttl_secs, 72 * 60 * 60);
    }

    #[test]
    fn malformed_override_is_an_error() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(|var| (var == RESERVATION_TTL_SECS_VAR).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { var: RESERVATION_TTL_SECS_VAR, .. }));
    }

    #[test]
    fn unordered_buckets_are_invalid() {
        let mut config = EngineConfig::default();
        config.recovery.bucket_thresholds_days = vec![8, 1];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_tenure_must_fit_under_the_maximum() {
        let mut config = EngineConfig::default();
        config.repayment.emi_max_tenure_months = 12;
        config.repayment.emi_default_tenure_months = 24;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
