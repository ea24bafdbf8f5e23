use chrono::{DateTime, Utc};

use crate::config::PenaltyCadence;
use crate::decimal::{Money, Rate};
use crate::model::{Fee, FeeDraft};
use crate::period::AccrualPeriod;
use crate::types::FeeKind;

/// penalty charged against each unpaid monthly fee
#[derive(Debug, Clone, Copy)]
pub struct PenaltyRule {
    pub rate: Rate,
    pub cadence: PenaltyCadence,
}

impl PenaltyRule {
    pub fn new(rate: Rate, cadence: PenaltyCadence) -> Self {
        Self { rate, cadence }
    }

    pub fn penalty_for(&self, monthly_fee: &Fee) -> Money {
        monthly_fee.amount.apply_rate(self.rate)
    }

    /// A monthly fee draws penalties only on passes after the one that
    /// charged it: a later UTC day for `Daily`, a later instant for `PerRun`.
    pub fn draft(&self, monthly_fee: &Fee, now: DateTime<Utc>) -> Option<FeeDraft> {
        if monthly_fee.kind != FeeKind::Monthly || monthly_fee.is_paid {
            return None;
        }

        let period = match self.cadence {
            PenaltyCadence::Daily => {
                if monthly_fee.created_at.date_naive() >= now.date_naive() {
                    return None;
                }
                Some(AccrualPeriod::day_of(now))
            }
            PenaltyCadence::PerRun => {
                if monthly_fee.created_at >= now {
                    return None;
                }
                None
            }
        };

        let amount = self.penalty_for(monthly_fee);
        if !amount.is_positive() {
            return None;
        }

        Some(FeeDraft {
            loan_id: monthly_fee.loan_id,
            kind: FeeKind::Penalty,
            amount,
            source_fee_id: Some(monthly_fee.id),
            period,
            created_at: now,
        })
    }
}
