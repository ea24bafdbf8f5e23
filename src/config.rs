use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::decimal::Rate;
use crate::errors::{LedgerError, Result};

/// how often an unpaid monthly fee draws a penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyCadence {
    /// at most one penalty per unpaid monthly fee per UTC calendar day
    Daily,
    /// one penalty per unpaid monthly fee on every accrual pass
    PerRun,
}

/// lending terms and accrual policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// monthly fee rate applied when a loan request does not name one
    pub default_monthly_fee_rate: Rate,
    /// days from issuance to due date
    pub loan_term_days: u32,
    /// share of an unpaid monthly fee charged as penalty
    pub penalty_rate: Rate,
    pub penalty_cadence: PenaltyCadence,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_monthly_fee_rate: Rate::from_decimal(dec!(0.40)),
            loan_term_days: 30,
            penalty_rate: Rate::from_decimal(dec!(0.10)),
            penalty_cadence: PenaltyCadence::Daily,
        }
    }
}

impl LedgerConfig {
    /// parse from json, any missing field takes its default
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LedgerError::InvalidConfiguration {
            message: e.to_string(),
        })
    }

    pub fn with_penalty_cadence(mut self, cadence: PenaltyCadence) -> Self {
        self.penalty_cadence = cadence;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_fraction("default_monthly_fee_rate", self.default_monthly_fee_rate)?;
        check_fraction("penalty_rate", self.penalty_rate)?;
        if self.loan_term_days == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "loan_term_days must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn check_fraction(name: &str, rate: Rate) -> Result<()> {
    let value = rate.as_decimal();
    if value <= Decimal::ZERO || value > Decimal::ONE {
        return Err(LedgerError::InvalidConfiguration {
            message: format!("{name} must be in (0, 1], got {value}"),
        });
    }
    Ok(())
}

/// sqlite store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
