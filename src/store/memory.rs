use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::{LedgerError, Result};
use crate::model::{Client, Fee, FeeDraft, Loan};
use crate::settlement::check_settleable;
use crate::store::LedgerStore;
use crate::types::{ClientId, FeeId, FeeKind, LoanId, SettlementOutcome};

#[derive(Debug, Default)]
struct Tables {
    clients: HashMap<ClientId, Client>,
    loans: HashMap<LoanId, Loan>,
    fees: HashMap<FeeId, Fee>,
}

impl Tables {
    fn fees_of(&self, loan_id: LoanId) -> Vec<Fee> {
        let mut fees: Vec<Fee> = self
            .fees
            .values()
            .filter(|f| f.loan_id == loan_id)
            .cloned()
            .collect();
        fees.sort_by_key(|f| (f.created_at, f.id));
        fees
    }
}

/// in-process store; one mutex makes every call atomic
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| LedgerError::StoreUnavailable {
            message: "memory ledger lock poisoned".to_string(),
        })
    }
}

fn sorted_loans<'a>(loans: impl Iterator<Item = &'a Loan>) -> Vec<Loan> {
    let mut loans: Vec<Loan> = loans.cloned().collect();
    loans.sort_by_key(|l| (l.created_at, l.id));
    loans
}

impl LedgerStore for MemoryLedger {
    fn insert_client(&self, client: Client) -> Result<Client> {
        let mut tables = self.lock()?;
        tables.clients.insert(client.id, client.clone());
        Ok(client)
    }

    fn client(&self, id: ClientId) -> Result<Option<Client>> {
        Ok(self.lock()?.clients.get(&id).cloned())
    }

    fn clients(&self) -> Result<Vec<Client>> {
        let tables = self.lock()?;
        let mut clients: Vec<Client> = tables.clients.values().cloned().collect();
        clients.sort_by_key(|c| (c.created_at, c.id));
        Ok(clients)
    }

    fn insert_loan(&self, loan: Loan) -> Result<Loan> {
        let mut tables = self.lock()?;
        if !tables.clients.contains_key(&loan.client_id) {
            return Err(LedgerError::ClientNotFound { id: loan.client_id });
        }
        tables.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        Ok(self.lock()?.loans.get(&id).cloned())
    }

    fn unpaid_loans(&self) -> Result<Vec<Loan>> {
        let tables = self.lock()?;
        Ok(sorted_loans(tables.loans.values().filter(|l| !l.paid)))
    }

    fn fee(&self, id: FeeId) -> Result<Option<Fee>> {
        Ok(self.lock()?.fees.get(&id).cloned())
    }

    fn fees_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fee>> {
        Ok(self.lock()?.fees_of(loan_id))
    }

    fn insert_fee_once(&self, draft: FeeDraft) -> Result<Option<Fee>> {
        let mut tables = self.lock()?;

        let loan = tables
            .loans
            .get(&draft.loan_id)
            .ok_or(LedgerError::LoanNotFound { id: draft.loan_id })?;
        if loan.paid {
            return Ok(None);
        }

        if let Some(source_id) = draft.source_fee_id {
            let source = tables
                .fees
                .get(&source_id)
                .ok_or(LedgerError::FeeNotFound { id: source_id })?;
            if source.is_paid || source.kind != FeeKind::Monthly {
                return Ok(None);
            }
        }

        for existing in tables.fees.values() {
            if existing.duplicates(&draft)? {
                return Ok(None);
            }
        }

        let fee = Fee::from_draft(&draft);
        tables.fees.insert(fee.id, fee.clone());
        Ok(Some(fee))
    }

    fn mark_fee_paid(&self, id: FeeId, at: DateTime<Utc>) -> Result<(Fee, SettlementOutcome)> {
        let mut tables = self.lock()?;
        let fee = tables
            .fees
            .get_mut(&id)
            .ok_or(LedgerError::FeeNotFound { id })?;
        if fee.is_paid {
            return Ok((fee.clone(), SettlementOutcome::AlreadyPaid));
        }
        fee.is_paid = true;
        fee.updated_at = at;
        Ok((fee.clone(), SettlementOutcome::Applied))
    }

    fn settle_loan(&self, id: LoanId, at: DateTime<Utc>) -> Result<(Loan, SettlementOutcome)> {
        let mut tables = self.lock()?;
        let fees = tables.fees_of(id);
        let loan = tables
            .loans
            .get_mut(&id)
            .ok_or(LedgerError::LoanNotFound { id })?;
        if loan.paid {
            return Ok((loan.clone(), SettlementOutcome::AlreadyPaid));
        }
        check_settleable(loan, &fees)?;
        loan.paid = true;
        loan.updated_at = at;
        Ok((loan.clone(), SettlementOutcome::Applied))
    }

    fn loans_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Loan>> {
        let tables = self.lock()?;
        Ok(sorted_loans(
            tables
                .loans
                .values()
                .filter(|l| start <= l.created_at && l.created_at <= end),
        ))
    }

    fn fees_paid_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Fee>> {
        let tables = self.lock()?;
        let mut fees: Vec<Fee> = tables
            .fees
            .values()
            .filter(|f| f.is_paid && start <= f.updated_at && f.updated_at <= end)
            .cloned()
            .collect();
        fees.sort_by_key(|f| (f.updated_at, f.id));
        Ok(fees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::{Money, Rate};
    use crate::period::AccrualPeriod;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn seeded() -> (MemoryLedger, Loan) {
        let store = MemoryLedger::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let client = store
            .insert_client(Client::new("Ana".into(), "Calle 1".into(), "555".into(), start))
            .unwrap();
        let loan = Loan::new(
            client.id,
            Money::from_major(1_000),
            Rate::from_decimal(dec!(0.40)),
            start,
            30,
        )
        .unwrap();
        let loan = store.insert_loan(loan).unwrap();
        (store, loan)
    }

    fn monthly_draft(loan: &Loan, at: DateTime<Utc>) -> FeeDraft {
        FeeDraft {
            loan_id: loan.id,
            kind: FeeKind::Monthly,
            amount: loan.monthly_fee(),
            source_fee_id: None,
            period: Some(AccrualPeriod::month_of(at)),
            created_at: at,
        }
    }

    #[test]
    fn test_loan_requires_client() {
        let store = MemoryLedger::new();
        let orphan = Loan::new(
            Uuid::new_v4(),
            Money::from_major(10),
            Rate::from_decimal(dec!(0.40)),
            Utc::now(),
            30,
        )
        .unwrap();
        assert!(matches!(store.insert_loan(orphan), Err(LedgerError::ClientNotFound { .. })));
    }

    #[test]
    fn test_insert_fee_once_per_period() {
        let (store, loan) = seeded();
        let at = loan.due_date + Duration::days(1);

        assert!(store.insert_fee_once(monthly_draft(&loan, at)).unwrap().is_some());
        assert!(store
            .insert_fee_once(monthly_draft(&loan, at + Duration::hours(3)))
            .unwrap()
            .is_none());
        assert_eq!(store.fees_for_loan(loan.id).unwrap().len(), 1);
    }

    #[test]
    fn test_no_fee_for_paid_loan() {
        let (store, loan) = seeded();
        let at = loan.due_date + Duration::days(1);
        store.settle_loan(loan.id, at).unwrap();
        assert!(store.insert_fee_once(monthly_draft(&loan, at)).unwrap().is_none());
    }

    #[test]
    fn test_settle_blocked_by_unpaid_fee() {
        let (store, loan) = seeded();
        let at = loan.due_date + Duration::days(1);
        let fee = store.insert_fee_once(monthly_draft(&loan, at)).unwrap().unwrap();

        let err = store.settle_loan(loan.id, at).unwrap_err();
        assert!(matches!(err, LedgerError::FeesOutstanding { unpaid_count: 1, .. }));
        assert!(!store.loan(loan.id).unwrap().unwrap().paid);

        store.mark_fee_paid(fee.id, at).unwrap();
        let (settled, outcome) = store.settle_loan(loan.id, at).unwrap();
        assert!(settled.paid);
        assert_eq!(outcome, SettlementOutcome::Applied);
    }

    #[test]
    fn test_paid_between_is_closed_interval() {
        let (store, loan) = seeded();
        let at = loan.due_date + Duration::days(1);
        let fee = store.insert_fee_once(monthly_draft(&loan, at)).unwrap().unwrap();
        let paid_at = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
        store.mark_fee_paid(fee.id, paid_at).unwrap();

        assert_eq!(store.fees_paid_between(paid_at, paid_at).unwrap().len(), 1);
        assert!(store
            .fees_paid_between(paid_at + Duration::nanoseconds(1), paid_at + Duration::days(1))
            .unwrap()
            .is_empty());
    }
}
