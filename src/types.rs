use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// unique identifier for a client
pub type ClientId = Uuid;

/// unique identifier for a loan
pub type LoanId = Uuid;

/// unique identifier for a fee
pub type FeeId = Uuid;

/// fee kinds charged against a loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeKind {
    /// principal x monthly fee rate, at most once per calendar month
    Monthly,
    /// share of an unpaid monthly fee
    #[serde(alias = "daily")]
    Penalty,
}

impl FeeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeKind::Monthly => "monthly",
            FeeKind::Penalty => "penalty",
        }
    }
}

impl fmt::Display for FeeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(FeeKind::Monthly),
            "penalty" | "daily" => Ok(FeeKind::Penalty),
            other => Err(format!("unknown fee kind: {other}")),
        }
    }
}

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// issued and not yet settled
    Active,
    /// settled in full, terminal
    Paid,
}

/// fee status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStatus {
    Unpaid,
    /// terminal
    Paid,
}

/// result of a payment against a fee or loan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOutcome {
    /// the record moved to its paid state in this call
    Applied,
    /// the record was already paid; nothing was written
    AlreadyPaid,
}
