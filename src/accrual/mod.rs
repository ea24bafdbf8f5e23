//! Fee accrual: derives new fee obligations from loan state and elapsed time.
//!
//! A pass selects every unpaid loan and, for loans past their due date,
//! charges the monthly fee for the current calendar month and a penalty for
//! each unpaid monthly fee. Each charge goes through the store's
//! `insert_fee_once` gate, so passes may be repeated or run concurrently
//! without double charging, and a pass interrupted by a store failure can be
//! retried as a whole.

pub mod monthly;
pub mod penalty;

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::Result;
use crate::model::{Fee, Loan};
use crate::store::LedgerStore;
use crate::types::{FeeKind, LoanId};

pub use monthly::MonthlyFeeRule;
pub use penalty::PenaltyRule;

/// fees created for one loan during a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanAccrual {
    pub loan_id: LoanId,
    pub monthly_fee: Option<Fee>,
    pub penalties: Vec<Fee>,
}

impl LoanAccrual {
    fn new(loan_id: LoanId) -> Self {
        Self {
            loan_id,
            monthly_fee: None,
            penalties: Vec::new(),
        }
    }

    pub fn charged(&self) -> Money {
        self.monthly_fee.iter().chain(&self.penalties).map(|f| f.amount).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.monthly_fee.is_none() && self.penalties.is_empty()
    }
}

/// outcome of one accrual pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccrualReport {
    pub run_at: DateTime<Utc>,
    pub loans_scanned: usize,
    /// unpaid loans whose due date has not passed
    pub loans_not_due: usize,
    /// one entry per past-due loan
    pub loans: Vec<LoanAccrual>,
}

impl AccrualReport {
    fn new(run_at: DateTime<Utc>) -> Self {
        Self {
            run_at,
            loans_scanned: 0,
            loans_not_due: 0,
            loans: Vec::new(),
        }
    }

    pub fn monthly_fees_created(&self) -> usize {
        self.loans.iter().filter(|l| l.monthly_fee.is_some()).count()
    }

    pub fn penalties_created(&self) -> usize {
        self.loans.iter().map(|l| l.penalties.len()).sum()
    }

    pub fn total_charged(&self) -> Money {
        self.loans.iter().map(LoanAccrual::charged).sum()
    }

    pub fn for_loan(&self, loan_id: LoanId) -> Option<&LoanAccrual> {
        self.loans.iter().find(|l| l.loan_id == loan_id)
    }

    pub fn is_noop(&self) -> bool {
        self.loans.iter().all(LoanAccrual::is_noop)
    }
}

/// engine for accruing monthly and penalty fees
#[derive(Debug, Clone)]
pub struct FeeAccrualEngine {
    pub monthly: MonthlyFeeRule,
    pub penalty: PenaltyRule,
}

impl FeeAccrualEngine {
    pub fn new(config: &LedgerConfig) -> Self {
        Self {
            monthly: MonthlyFeeRule::new(),
            penalty: PenaltyRule::new(config.penalty_rate, config.penalty_cadence),
        }
    }

    /// run one pass as of `now`
    #[instrument(skip(self, store))]
    pub fn accrue<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<AccrualReport> {
        let loans = store.unpaid_loans()?;
        let mut report = AccrualReport::new(now);

        for (processed, loan) in loans.iter().enumerate() {
            report.loans_scanned += 1;
            if !loan.is_past_due(now) {
                report.loans_not_due += 1;
                continue;
            }
            match self.accrue_loan(store, loan, now) {
                Ok(accrual) => report.loans.push(accrual),
                Err(err) => {
                    warn!(loan_id = %loan.id, processed, error = %err, "accrual pass interrupted");
                    return Err(err);
                }
            }
        }

        info!(
            scanned = report.loans_scanned,
            monthly = report.monthly_fees_created(),
            penalties = report.penalties_created(),
            charged = %report.total_charged(),
            "accrual pass complete"
        );
        Ok(report)
    }

    /// run one pass with the provider's current time
    pub fn accrue_now<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        time_provider: &SafeTimeProvider,
    ) -> Result<AccrualReport> {
        self.accrue(store, time_provider.now())
    }

    /// accrue a single loan; safe to repeat
    pub fn accrue_loan<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        loan: &Loan,
        now: DateTime<Utc>,
    ) -> Result<LoanAccrual> {
        let mut accrual = LoanAccrual::new(loan.id);

        if let Some(draft) = self.monthly.draft(loan, now) {
            if let Some(fee) = store.insert_fee_once(draft)? {
                debug!(
                    loan_id = %loan.id,
                    fee_id = %fee.id,
                    amount = %fee.amount,
                    "monthly fee charged"
                );
                accrual.monthly_fee = Some(fee);
            }
        }

        let unpaid_monthly = store
            .fees_for_loan(loan.id)?
            .into_iter()
            .filter(|f| f.kind == FeeKind::Monthly && !f.is_paid);
        for monthly_fee in unpaid_monthly {
            let Some(draft) = self.penalty.draft(&monthly_fee, now) else {
                continue;
            };
            if let Some(fee) = store.insert_fee_once(draft)? {
                debug!(
                    loan_id = %loan.id,
                    source_fee_id = %monthly_fee.id,
                    amount = %fee.amount,
                    "penalty charged"
                );
                accrual.penalties.push(fee);
            }
        }

        Ok(accrual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PenaltyCadence;
    use crate::decimal::Rate;
    use crate::errors::LedgerError;
    use crate::model::{Client, FeeDraft};
    use crate::store::MemoryLedger;
    use crate::types::{ClientId, FeeId, SettlementOutcome};
    use chrono::{Datelike, Duration, TimeZone};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn issue(store: &impl LedgerStore, principal: i64, start: DateTime<Utc>) -> Loan {
        let client = store
            .insert_client(Client::new("Ana".into(), "Calle 1".into(), "555".into(), start))
            .unwrap();
        let loan = Loan::new(
            client.id,
            Money::from_major(principal),
            Rate::from_decimal(dec!(0.40)),
            start,
            30,
        )
        .unwrap();
        store.insert_loan(loan).unwrap()
    }

    fn jan_5() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()
    }

    fn count(fees: &[Fee], kind: FeeKind) -> usize {
        fees.iter().filter(|f| f.kind == kind).count()
    }

    #[test]
    fn test_same_month_is_idempotent() {
        let store = MemoryLedger::new();
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let a = issue(&store, 1_000, jan_5());
        let b = issue(&store, 500, jan_5());
        let now = a.due_date + Duration::days(1);

        let first = engine.accrue(&store, now).unwrap();
        assert_eq!(first.monthly_fees_created(), 2);
        assert_eq!(first.total_charged(), Money::from_major(600));

        let second = engine.accrue(&store, now).unwrap();
        assert!(second.is_noop());

        for loan in [&a, &b] {
            assert_eq!(count(&store.fees_for_loan(loan.id).unwrap(), FeeKind::Monthly), 1);
        }
    }

    #[test]
    fn test_future_due_date_accrues_nothing() {
        let store = MemoryLedger::new();
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let loan = issue(&store, 1_000, jan_5());

        for days in [0, 1, 15, 29, 30] {
            let report = engine.accrue(&store, loan.created_at + Duration::days(days)).unwrap();
            assert_eq!(report.loans_not_due, 1);
            assert!(report.loans.is_empty());
        }
        assert!(store.fees_for_loan(loan.id).unwrap().is_empty());
    }

    #[test]
    fn test_daily_penalty_on_next_pass() {
        let store = MemoryLedger::new();
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let loan = issue(&store, 1_000, jan_5());
        let day_one = loan.due_date + Duration::days(1);

        let report = engine.accrue(&store, day_one).unwrap();
        assert_eq!(report.monthly_fees_created(), 1);
        assert_eq!(report.penalties_created(), 0);

        let report = engine.accrue(&store, day_one + Duration::days(1)).unwrap();
        let penalties = &report.for_loan(loan.id).unwrap().penalties;
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties[0].amount, Money::from_major(40));

        // same day again
        let report = engine.accrue(&store, day_one + Duration::days(1) + Duration::hours(2)).unwrap();
        assert!(report.is_noop());

        let report = engine.accrue(&store, day_one + Duration::days(2)).unwrap();
        assert_eq!(report.penalties_created(), 1);

        let fees = store.fees_for_loan(loan.id).unwrap();
        assert_eq!(count(&fees, FeeKind::Penalty), 2);
        assert_eq!(loan.total_owed(&fees), Money::from_major(1_480));
    }

    #[test]
    fn test_per_run_penalty_cadence() {
        let store = MemoryLedger::new();
        let config = LedgerConfig::default().with_penalty_cadence(PenaltyCadence::PerRun);
        let engine = FeeAccrualEngine::new(&config);
        let loan = issue(&store, 1_000, jan_5());
        let now = loan.due_date + Duration::days(1);

        engine.accrue(&store, now).unwrap();
        engine.accrue(&store, now + Duration::minutes(1)).unwrap();
        engine.accrue(&store, now + Duration::minutes(2)).unwrap();

        let fees = store.fees_for_loan(loan.id).unwrap();
        assert_eq!(count(&fees, FeeKind::Monthly), 1);
        assert_eq!(count(&fees, FeeKind::Penalty), 2);
    }

    #[test]
    fn test_new_month_charges_again_and_penalises_each_unpaid_fee() {
        let store = MemoryLedger::new();
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let loan = issue(&store, 1_000, jan_5());

        engine.accrue(&store, Utc.with_ymd_and_hms(2024, 2, 20, 0, 0, 0).unwrap()).unwrap();
        let march = engine.accrue(&store, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()).unwrap();

        let accrual = march.for_loan(loan.id).unwrap();
        assert!(accrual.monthly_fee.is_some());
        // only february's fee predates today's pass
        assert_eq!(accrual.penalties.len(), 1);

        let next = engine.accrue(&store, Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap()).unwrap();
        assert_eq!(next.penalties_created(), 2);
        assert!(next.for_loan(loan.id).unwrap().monthly_fee.is_none());
    }

    #[test]
    fn test_paid_monthly_fee_stops_penalties() {
        let store = MemoryLedger::new();
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let loan = issue(&store, 1_000, jan_5());
        let day_one = loan.due_date + Duration::days(1);

        let report = engine.accrue(&store, day_one).unwrap();
        let fee = report.for_loan(loan.id).unwrap().monthly_fee.clone().unwrap();
        let (_, outcome) = store.mark_fee_paid(fee.id, day_one).unwrap();
        assert_eq!(outcome, SettlementOutcome::Applied);

        let report = engine.accrue(&store, day_one + Duration::days(1)).unwrap();
        assert!(report.is_noop());
    }

    #[test]
    fn test_accrue_now_uses_time_provider() {
        let store = MemoryLedger::new();
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let loan = issue(&store, 500, jan_5());

        let time = SafeTimeProvider::new(TimeSource::Test(jan_5()));
        let control = time.test_control().unwrap();

        control.advance(Duration::days(20));
        assert!(engine.accrue_now(&store, &time).unwrap().loans.is_empty());

        control.advance(Duration::days(11));
        let report = engine.accrue_now(&store, &time).unwrap();
        assert_eq!(report.run_at.month(), 2);
        assert_eq!(report.for_loan(loan.id).unwrap().charged(), Money::from_major(200));
    }

    #[test]
    fn test_concurrent_passes_charge_once() {
        let store = Arc::new(MemoryLedger::new());
        let engine = Arc::new(FeeAccrualEngine::new(&LedgerConfig::default()));
        let loans: Vec<Loan> = (1..=5).map(|i| issue(&*store, i * 100, jan_5())).collect();
        let day_one = loans[0].due_date + Duration::days(1);

        for now in [day_one, day_one + Duration::days(1)] {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || engine.accrue(&store, now).unwrap())
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        }

        for loan in &loans {
            let fees = store.fees_for_loan(loan.id).unwrap();
            assert_eq!(count(&fees, FeeKind::Monthly), 1);
            assert_eq!(count(&fees, FeeKind::Penalty), 1);
        }
    }

    /// fails every write after the first `budget` fee inserts
    struct FlakyLedger {
        inner: MemoryLedger,
        budget: AtomicUsize,
    }

    impl LedgerStore for FlakyLedger {
        fn insert_client(&self, client: Client) -> Result<Client> {
            self.inner.insert_client(client)
        }
        fn client(&self, id: ClientId) -> Result<Option<Client>> {
            self.inner.client(id)
        }
        fn clients(&self) -> Result<Vec<Client>> {
            self.inner.clients()
        }
        fn insert_loan(&self, loan: Loan) -> Result<Loan> {
            self.inner.insert_loan(loan)
        }
        fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
            self.inner.loan(id)
        }
        fn unpaid_loans(&self) -> Result<Vec<Loan>> {
            self.inner.unpaid_loans()
        }
        fn fee(&self, id: FeeId) -> Result<Option<Fee>> {
            self.inner.fee(id)
        }
        fn fees_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fee>> {
            self.inner.fees_for_loan(loan_id)
        }
        fn insert_fee_once(&self, draft: FeeDraft) -> Result<Option<Fee>> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(LedgerError::StoreUnavailable { message: "connection reset".into() });
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.insert_fee_once(draft)
        }
        fn mark_fee_paid(&self, id: FeeId, at: DateTime<Utc>) -> Result<(Fee, SettlementOutcome)> {
            self.inner.mark_fee_paid(id, at)
        }
        fn settle_loan(&self, id: LoanId, at: DateTime<Utc>) -> Result<(Loan, SettlementOutcome)> {
            self.inner.settle_loan(id, at)
        }
        fn loans_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Loan>> {
            self.inner.loans_created_between(start, end)
        }
        fn fees_paid_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Fee>> {
            self.inner.fees_paid_between(start, end)
        }
    }

    #[test]
    fn test_interrupted_pass_retries_without_double_charge() {
        let store = FlakyLedger {
            inner: MemoryLedger::new(),
            budget: AtomicUsize::new(2),
        };
        let engine = FeeAccrualEngine::new(&LedgerConfig::default());
        let loans: Vec<Loan> = (1..=4).map(|i| issue(&store, i * 100, jan_5())).collect();
        let now = loans[0].due_date + Duration::days(1);

        let err = engine.accrue(&store, now).unwrap_err();
        assert!(err.is_retryable());

        let charged: usize = loans
            .iter()
            .map(|l| store.fees_for_loan(l.id).unwrap().len())
            .sum();
        assert_eq!(charged, 2);

        store.budget.store(usize::MAX, Ordering::SeqCst);
        let retry = engine.accrue(&store, now).unwrap();
        assert_eq!(retry.monthly_fees_created(), 2);

        for loan in &loans {
            let fees = store.fees_for_loan(loan.id).unwrap();
            assert_eq!(count(&fees, FeeKind::Monthly), 1);
            assert_eq!(fees[0].amount, loan.monthly_fee());
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn dedup_and_total_owed_hold(
                principal in 1i64..50_000,
                offsets in proptest::collection::vec(0i64..(24 * 120), 1..25),
                pay_mask in proptest::collection::vec(any::<bool>(), 25),
            ) {
                let store = MemoryLedger::new();
                let engine = FeeAccrualEngine::new(&LedgerConfig::default());
                let loan = issue(&store, principal, jan_5());

                let mut hours = offsets;
                hours.sort_unstable();

                for (i, h) in hours.iter().enumerate() {
                    let now = loan.created_at + Duration::hours(*h);
                    engine.accrue(&store, now).unwrap();

                    if pay_mask[i] {
                        if let Some(fee) = store.fees_for_loan(loan.id).unwrap().into_iter().find(|f| !f.is_paid) {
                            store.mark_fee_paid(fee.id, now).unwrap();
                        }
                    }

                    let fees = store.fees_for_loan(loan.id).unwrap();
                    let unpaid: Money = fees.iter().filter(|f| !f.is_paid).map(|f| f.amount).sum();
                    prop_assert_eq!(loan.total_owed(&fees), loan.principal + unpaid);

                    let mut months = HashSet::new();
                    let mut penalty_days = HashSet::new();
                    for fee in &fees {
                        prop_assert!(fee.amount.is_positive());
                        prop_assert!(fee.created_at > loan.due_date);
                        match fee.kind {
                            FeeKind::Monthly => {
                                prop_assert!(months.insert((fee.created_at.year(), fee.created_at.month())));
                            }
                            FeeKind::Penalty => {
                                prop_assert!(penalty_days.insert((fee.source_fee_id, fee.created_at.date_naive())));
                            }
                        }
                    }
                }
            }
        }
    }
}
