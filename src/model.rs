use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::period::AccrualPeriod;
use crate::types::{ClientId, FeeId, FeeKind, FeeStatus, LoanId, LoanStatus};

/// a borrower
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(name: String, address: String, phone: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            address,
            phone,
            created_at,
        }
    }
}

/// a cash loan owed in full at settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub client_id: ClientId,
    pub principal: Money,
    pub monthly_fee_rate: Rate,
    pub due_date: DateTime<Utc>,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
    /// stamped at payoff
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// fails with `InvalidDate` when the due date falls outside chrono's range
    pub fn new(
        client_id: ClientId,
        principal: Money,
        monthly_fee_rate: Rate,
        start: DateTime<Utc>,
        term_days: u32,
    ) -> Result<Self> {
        let due_date = start
            .checked_add_signed(Duration::days(i64::from(term_days)))
            .ok_or_else(|| LedgerError::InvalidDate {
                message: format!("due date {term_days} days after {start} is out of range"),
            })?;
        Ok(Self {
            id: Uuid::new_v4(),
            client_id,
            principal,
            monthly_fee_rate,
            due_date,
            paid: false,
            created_at: start,
            updated_at: start,
        })
    }

    pub fn status(&self) -> LoanStatus {
        if self.paid {
            LoanStatus::Paid
        } else {
            LoanStatus::Active
        }
    }

    /// strictly after the due date
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        now > self.due_date
    }

    /// monthly charge for this loan
    pub fn monthly_fee(&self) -> Money {
        self.principal.apply_rate(self.monthly_fee_rate)
    }

    /// principal plus every unpaid fee that belongs to this loan
    pub fn total_owed(&self, fees: &[Fee]) -> Money {
        self.principal + unpaid_total(self.id, fees)
    }
}

/// sum of unpaid fees for one loan
pub fn unpaid_total(loan_id: LoanId, fees: &[Fee]) -> Money {
    fees.iter()
        .filter(|f| f.loan_id == loan_id && !f.is_paid)
        .map(|f| f.amount)
        .sum()
}

/// a charge against a loan, append-only apart from the paid flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub id: FeeId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub kind: FeeKind,
    /// monthly fee a penalty was charged against
    pub source_fee_id: Option<FeeId>,
    /// accrual period the fee was charged for, when deduplicated
    pub period_key: Option<String>,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
    /// stamped at payment
    pub updated_at: DateTime<Utc>,
}

impl Fee {
    pub fn from_draft(draft: &FeeDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: draft.loan_id,
            amount: draft.amount,
            kind: draft.kind,
            source_fee_id: draft.source_fee_id,
            period_key: draft.period.map(|p| p.key()),
            is_paid: false,
            created_at: draft.created_at,
            updated_at: draft.created_at,
        }
    }

    pub fn status(&self) -> FeeStatus {
        if self.is_paid {
            FeeStatus::Paid
        } else {
            FeeStatus::Unpaid
        }
    }

    /// whether an existing fee blocks `draft` from being written
    pub fn duplicates(&self, draft: &FeeDraft) -> Result<bool> {
        let Some(period) = draft.period else {
            return Ok(false);
        };
        if self.loan_id != draft.loan_id
            || self.kind != draft.kind
            || self.source_fee_id != draft.source_fee_id
        {
            return Ok(false);
        }
        period.contains(self.created_at)
    }
}

/// a fee the accrual engine wants written, subject to the store's dedup gate
#[derive(Debug, Clone, PartialEq)]
pub struct FeeDraft {
    pub loan_id: LoanId,
    pub kind: FeeKind,
    pub amount: Money,
    pub source_fee_id: Option<FeeId>,
    /// `None` writes unconditionally
    pub period: Option<AccrualPeriod>,
    pub created_at: DateTime<Utc>,
}
