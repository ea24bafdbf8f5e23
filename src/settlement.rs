//! Settlement guard: moves fees and loans to their terminal paid state.
//!
//! A loan can only be paid once every fee charged against it is paid. Paying
//! something that is already paid is a successful no-op that reports
//! `SettlementOutcome::AlreadyPaid` and leaves timestamps untouched.

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::errors::{LedgerError, Result};
use crate::model::{unpaid_total, Fee, Loan};
use crate::store::LedgerStore;
use crate::types::{FeeId, LoanId, SettlementOutcome};

/// a record after a payment request, with what the request did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement<T> {
    pub record: T,
    pub outcome: SettlementOutcome,
}

impl<T> Settlement<T> {
    pub fn newly_settled(&self) -> bool {
        self.outcome == SettlementOutcome::Applied
    }
}

/// precondition for paying off a loan: zero unpaid fees
pub fn check_settleable(loan: &Loan, fees: &[Fee]) -> Result<()> {
    let unpaid_count = fees
        .iter()
        .filter(|f| f.loan_id == loan.id && !f.is_paid)
        .count();
    if unpaid_count > 0 {
        return Err(LedgerError::FeesOutstanding {
            loan_id: loan.id,
            unpaid_count,
            unpaid_total: unpaid_total(loan.id, fees),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementGuard;

impl SettlementGuard {
    pub fn new() -> Self {
        Self
    }

    /// mark a single fee paid
    #[instrument(skip(self, store))]
    pub fn pay_fee<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        fee_id: FeeId,
        now: DateTime<Utc>,
    ) -> Result<Settlement<Fee>> {
        let (fee, outcome) = store.mark_fee_paid(fee_id, now)?;
        match outcome {
            SettlementOutcome::Applied => {
                info!(loan_id = %fee.loan_id, amount = %fee.amount, kind = %fee.kind, "fee paid")
            }
            SettlementOutcome::AlreadyPaid => debug!("fee already paid"),
        }
        Ok(Settlement { record: fee, outcome })
    }

    /// pay off a loan; rejected while any of its fees is unpaid
    #[instrument(skip(self, store))]
    pub fn pay_loan<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        loan_id: LoanId,
        now: DateTime<Utc>,
    ) -> Result<Settlement<Loan>> {
        match store.settle_loan(loan_id, now) {
            Ok((loan, outcome)) => {
                match outcome {
                    SettlementOutcome::Applied => {
                        info!(principal = %loan.principal, "loan settled")
                    }
                    SettlementOutcome::AlreadyPaid => debug!("loan already paid"),
                }
                Ok(Settlement { record: loan, outcome })
            }
            Err(err @ LedgerError::FeesOutstanding { .. }) => {
                info!(error = %err, "loan payment rejected");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    pub fn pay_fee_now<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        fee_id: FeeId,
        time_provider: &SafeTimeProvider,
    ) -> Result<Settlement<Fee>> {
        self.pay_fee(store, fee_id, time_provider.now())
    }

    pub fn pay_loan_now<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        loan_id: LoanId,
        time_provider: &SafeTimeProvider,
    ) -> Result<Settlement<Loan>> {
        self.pay_loan(store, loan_id, time_provider.now())
    }
}
