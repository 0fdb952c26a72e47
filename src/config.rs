//! Engine configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::types::{LedgerError, LedgerResult, SystemRole};

/// How statement ingest treats the running balance column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    /// Recompute forward from the opening balance and keep the computed value
    Recompute,
    /// Keep the balance the bank reported
    TrustSource,
}

/// Tunables for posting, budget control and reconciliation.
///
/// Nothing here is a fiscal period or organization: those travel with every
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum fractional digits accepted on any amount
    pub amount_scale: i64,
    /// Retries after an allocation version conflict before giving up
    pub max_conflict_retries: u32,
    /// Roles that must resolve to an account when the engine is opened
    pub required_system_roles: Vec<SystemRole>,
    pub require_reversal_reason: bool,
    /// Refuse reversing vouchers posted longer ago than this
    pub reversal_cutoff_days: Option<i64>,
    pub balance_policy: BalancePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            amount_scale: 2,
            max_conflict_retries: 3,
            required_system_roles: Vec::new(),
            require_reversal_reason: true,
            reversal_cutoff_days: None,
            balance_policy: BalancePolicy::Recompute,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> LedgerResult<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if !(0..=8).contains(&self.amount_scale) {
            return Err(LedgerError::Config(format!(
                "amount_scale must be between 0 and 8, got {}",
                self.amount_scale
            )));
        }
        if let Some(days) = self.reversal_cutoff_days {
            if days < 0 {
                return Err(LedgerError::Config(
                    "reversal_cutoff_days cannot be negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = EngineConfig::default();
        assert_eq!(c.amount_scale, 2);
        assert_eq!(c.max_conflict_retries, 3);
        assert!(c.require_reversal_reason);
        assert!(c.reversal_cutoff_days.is_none());
        assert_eq!(c.balance_policy, BalancePolicy::Recompute);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str(
            r#"
            max_conflict_retries = 5
            required_system_roles = ["accounts-payable", "tax-withheld-income"]
            balance_policy = "trust_source"
            "#,
        )
        .unwrap();
        assert_eq!(c.max_conflict_retries, 5);
        assert_eq!(
            c.required_system_roles,
            vec![SystemRole::AccountsPayable, SystemRole::IncomeTaxWithheld]
        );
        assert_eq!(c.balance_policy, BalancePolicy::TrustSource);
        assert_eq!(c.amount_scale, 2);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("amount_scale = 12"),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("required_system_roles = [\"petty-cash\"]"),
            Err(LedgerError::Config(_))
        ));
    }
}
