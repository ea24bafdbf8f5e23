//! Durable records for clients, loans and fees.
//!
//! Every method is a single atomic unit. In particular `insert_fee_once`,
//! `mark_fee_paid` and `settle_loan` perform their check and their write under
//! one lock or transaction, so concurrent accrual passes and payments cannot
//! interleave between the check and the write.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::model::{Client, Fee, FeeDraft, Loan};
use crate::types::{ClientId, FeeId, LoanId, SettlementOutcome};

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

pub trait LedgerStore: Send + Sync {
    fn insert_client(&self, client: Client) -> Result<Client>;

    fn client(&self, id: ClientId) -> Result<Option<Client>>;

    fn clients(&self) -> Result<Vec<Client>>;

    /// fails with `ClientNotFound` when the owning client does not exist
    fn insert_loan(&self, loan: Loan) -> Result<Loan>;

    fn loan(&self, id: LoanId) -> Result<Option<Loan>>;

    fn unpaid_loans(&self) -> Result<Vec<Loan>>;

    fn fee(&self, id: FeeId) -> Result<Option<Fee>>;

    fn fees_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fee>>;

    /// write the draft unless the loan is paid, its source fee is paid, or a
    /// fee with the same loan, kind and source already falls in the draft's
    /// period. Returns `None` when nothing was written.
    fn insert_fee_once(&self, draft: FeeDraft) -> Result<Option<Fee>>;

    /// flip a fee to paid; an already-paid fee is returned untouched
    fn mark_fee_paid(&self, id: FeeId, at: DateTime<Utc>) -> Result<(Fee, SettlementOutcome)>;

    /// flip a loan to paid if it has no unpaid fees; an already-paid loan is
    /// returned untouched
    fn settle_loan(&self, id: LoanId, at: DateTime<Utc>) -> Result<(Loan, SettlementOutcome)>;

    /// loans whose `created_at` falls in `[start, end]`
    fn loans_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Loan>>;

    /// paid fees whose `updated_at` falls in `[start, end]`
    fn fees_paid_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Fee>>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for std::sync::Arc<S> {
    fn insert_client(&self, client: Client) -> Result<Client> {
        (**self).insert_client(client)
    }

    fn client(&self, id: ClientId) -> Result<Option<Client>> {
        (**self).client(id)
    }

    fn clients(&self) -> Result<Vec<Client>> {
        (**self).clients()
    }

    fn insert_loan(&self, loan: Loan) -> Result<Loan> {
        (**self).insert_loan(loan)
    }

    fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        (**self).loan(id)
    }

    fn unpaid_loans(&self) -> Result<Vec<Loan>> {
        (**self).unpaid_loans()
    }

    fn fee(&self, id: FeeId) -> Result<Option<Fee>> {
        (**self).fee(id)
    }

    fn fees_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fee>> {
        (**self).fees_for_loan(loan_id)
    }

    fn insert_fee_once(&self, draft: FeeDraft) -> Result<Option<Fee>> {
        (**self).insert_fee_once(draft)
    }

    fn mark_fee_paid(&self, id: FeeId, at: DateTime<Utc>) -> Result<(Fee, SettlementOutcome)> {
        (**self).mark_fee_paid(id, at)
    }

    fn settle_loan(&self, id: LoanId, at: DateTime<Utc>) -> Result<(Loan, SettlementOutcome)> {
        (**self).settle_loan(id, at)
    }

    fn loans_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Loan>> {
        (**self).loans_created_between(start, end)
    }

    fn fees_paid_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Fee>> {
        (**self).fees_paid_between(start, end)
    }
}
