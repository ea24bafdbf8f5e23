use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::ClientId;

const MAX_NAME_LEN: usize = 255;
const MAX_PHONE_LEN: usize = 20;

/// client registration input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
}

impl NewClient {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            phone: phone.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(LedgerError::validation("name", "name is required"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(LedgerError::validation(
                "name",
                format!("at most {MAX_NAME_LEN} characters"),
            ));
        }
        if self.phone.trim().chars().count() > MAX_PHONE_LEN {
            return Err(LedgerError::validation(
                "phone",
                format!("at most {MAX_PHONE_LEN} characters"),
            ));
        }
        Ok(())
    }
}

/// loan issuance input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub client_id: ClientId,
    pub principal: Money,
    /// defaults to now
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// percentage, 40 meaning 40%; defaults to the configured rate
    #[serde(default)]
    pub monthly_fee_rate_pct: Option<Decimal>,
}

impl LoanRequest {
    pub fn new(client_id: ClientId, principal: Money) -> Self {
        Self {
            client_id,
            principal,
            start_date: None,
            monthly_fee_rate_pct: None,
        }
    }

    pub fn starting(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn with_rate_pct(mut self, pct: Decimal) -> Self {
        self.monthly_fee_rate_pct = Some(pct);
        self
    }

    pub fn validate(&self) -> Result<()> {
        // judged at cent precision, the precision it is stored at
        let principal = Money::from_decimal(self.principal.as_decimal());
        if !principal.is_positive() {
            return Err(LedgerError::validation(
                "principal",
                format!("must be positive, got {}", self.principal.as_decimal()),
            ));
        }
        if let Some(pct) = self.monthly_fee_rate_pct {
            if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
                return Err(LedgerError::validation(
                    "monthly_fee_rate_pct",
                    format!("must be in (0, 100], got {pct}"),
                ));
            }
        }
        Ok(())
    }

    /// requested rate as a fraction, or `default`
    pub fn fee_rate_or(&self, default: Rate) -> Rate {
        self.monthly_fee_rate_pct
            .map(Rate::from_percentage)
            .unwrap_or(default)
    }
}
