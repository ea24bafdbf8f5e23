use chrono::{DateTime, Datelike, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::Serialize;
use tracing::{info, instrument};

use crate::accrual::{AccrualReport, FeeAccrualEngine};
use crate::balance::{BalanceAggregator, YearlyBalance};
use crate::config::LedgerConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::model::{unpaid_total, Client, Fee, Loan};
use crate::requests::{LoanRequest, NewClient};
use crate::settlement::{Settlement, SettlementGuard};
use crate::store::LedgerStore;
use crate::types::{FeeId, LoanId};

/// an unpaid loan with what is currently owed on it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveLoan {
    pub loan: Loan,
    pub client_name: String,
    pub unpaid_fees: Vec<Fee>,
    pub fees_total: Money,
    pub total_owed: Money,
}

/// an unpaid loan past its due date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverdueLoan {
    pub loan_id: LoanId,
    pub client_name: String,
    pub principal: Money,
    pub due_date: DateTime<Utc>,
}

/// the lending book: one store, one shared clock, and the engines that act on it
pub struct LoanLedger<'t, S: LedgerStore> {
    pub config: LedgerConfig,
    store: S,
    time_provider: &'t SafeTimeProvider,
    accrual: FeeAccrualEngine,
    settlement: SettlementGuard,
    balance: BalanceAggregator,
}

impl<'t, S: LedgerStore> LoanLedger<'t, S> {
    pub fn new(
        store: S,
        config: LedgerConfig,
        time_provider: &'t SafeTimeProvider,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            accrual: FeeAccrualEngine::new(&config),
            settlement: SettlementGuard::new(),
            balance: BalanceAggregator::new(),
            config,
            store,
            time_provider,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time_provider.now()
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn register_client(&self, request: NewClient) -> Result<Client> {
        request.validate()?;
        let client = Client::new(
            request.name.trim().to_string(),
            request.address.trim().to_string(),
            request.phone.trim().to_string(),
            self.now(),
        );
        let client = self.store.insert_client(client)?;
        info!(client_id = %client.id, "client registered");
        Ok(client)
    }

    pub fn clients(&self) -> Result<Vec<Client>> {
        self.store.clients()
    }

    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub fn issue_loan(&self, request: LoanRequest) -> Result<Loan> {
        request.validate()?;
        if self.store.client(request.client_id)?.is_none() {
            return Err(LedgerError::ClientNotFound { id: request.client_id });
        }

        let start = request.start_date.unwrap_or_else(|| self.now());
        let rate: Rate = request.fee_rate_or(self.config.default_monthly_fee_rate);
        let principal = Money::from_decimal(request.principal.as_decimal());

        let term = self.config.loan_term_days;
        let loan = Loan::new(request.client_id, principal, rate, start, term)?;
        let loan = self.store.insert_loan(loan)?;
        info!(
            loan_id = %loan.id,
            principal = %loan.principal,
            rate = %loan.monthly_fee_rate,
            due = %loan.due_date,
            "loan issued"
        );
        Ok(loan)
    }

    pub fn loan(&self, id: LoanId) -> Result<Loan> {
        self.store.loan(id)?.ok_or(LedgerError::LoanNotFound { id })
    }

    pub fn fees(&self, loan_id: LoanId) -> Result<Vec<Fee>> {
        self.loan(loan_id)?;
        self.store.fees_for_loan(loan_id)
    }

    /// accrue fees as of the ledger clock
    pub fn accrue(&self) -> Result<AccrualReport> {
        self.accrue_at(self.now())
    }

    pub fn accrue_at(&self, now: DateTime<Utc>) -> Result<AccrualReport> {
        self.accrual.accrue(&self.store, now)
    }

    pub fn pay_fee(&self, fee_id: FeeId) -> Result<Settlement<Fee>> {
        self.settlement.pay_fee(&self.store, fee_id, self.now())
    }

    pub fn pay_loan(&self, loan_id: LoanId) -> Result<Settlement<Loan>> {
        self.settlement.pay_loan(&self.store, loan_id, self.now())
    }

    /// every unpaid loan with its unpaid fees itemised
    pub fn active_loans(&self) -> Result<Vec<ActiveLoan>> {
        let mut active = Vec::new();
        for loan in self.store.unpaid_loans()? {
            let client_name = self.client_name(&loan)?;
            let unpaid_fees: Vec<Fee> = self
                .store
                .fees_for_loan(loan.id)?
                .into_iter()
                .filter(|f| !f.is_paid)
                .collect();
            let fees_total = unpaid_total(loan.id, &unpaid_fees);
            active.push(ActiveLoan {
                total_owed: loan.principal + fees_total,
                client_name,
                unpaid_fees,
                fees_total,
                loan,
            });
        }
        Ok(active)
    }

    /// unpaid loans whose due date is before the ledger clock
    pub fn overdue_loans(&self) -> Result<Vec<OverdueLoan>> {
        let now = self.now();
        let mut overdue = Vec::new();
        for loan in self.store.unpaid_loans()? {
            if !loan.is_past_due(now) {
                continue;
            }
            overdue.push(OverdueLoan {
                loan_id: loan.id,
                client_name: self.client_name(&loan)?,
                principal: loan.principal,
                due_date: loan.due_date,
            });
        }
        Ok(overdue)
    }

    pub fn yearly_balance(&self, year: i32) -> Result<YearlyBalance> {
        self.balance.yearly_balance(&self.store, year)
    }

    /// balance for the clock's current year
    pub fn yearly_balance_now(&self) -> Result<YearlyBalance> {
        self.yearly_balance(self.now().year())
    }

    fn client_name(&self, loan: &Loan) -> Result<String> {
        self.store
            .client(loan.client_id)?
            .map(|c| c.name)
            .ok_or(LedgerError::ClientNotFound { id: loan.client_id })
    }
}
