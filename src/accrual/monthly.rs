use chrono::{DateTime, Utc};

use crate::model::{FeeDraft, Loan};
use crate::period::AccrualPeriod;
use crate::types::FeeKind;

/// principal x monthly fee rate, once per calendar month after the due date
#[derive(Debug, Clone, Copy, Default)]
pub struct MonthlyFeeRule;

impl MonthlyFeeRule {
    pub fn new() -> Self {
        Self
    }

    /// the charge owed for the month containing `now`, if any
    pub fn draft(&self, loan: &Loan, now: DateTime<Utc>) -> Option<FeeDraft> {
        if loan.paid || !loan.is_past_due(now) {
            return None;
        }
        let amount = loan.monthly_fee();
        if !amount.is_positive() {
            return None;
        }
        Some(FeeDraft {
            loan_id: loan.id,
            kind: FeeKind::Monthly,
            amount,
            source_fee_id: None,
            period: Some(AccrualPeriod::month_of(now)),
            created_at: now,
        })
    }
}
