//! Yearly balance: loaned, earned and recovered amounts bucketed by UTC month.

use chrono::{DateTime, Datelike, Month, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::period::year_span;
use crate::store::LedgerStore;

/// one month of the yearly balance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBalance {
    /// 1-12
    pub month: u32,
    pub name: &'static str,
    pub short_name: &'static str,
    /// principal of loans issued this month
    pub loaned: Money,
    /// principal of loans paid off this month
    pub recovered: Money,
    /// fees paid this month
    pub earnings: Money,
}

impl MonthlyBalance {
    fn new(month: Month) -> Self {
        let name = month.name();
        Self {
            month: month.number_from_month(),
            name,
            short_name: &name[..3],
            loaned: Money::ZERO,
            recovered: Money::ZERO,
            earnings: Money::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyBalance {
    pub year: i32,
    pub total_loaned: Money,
    pub total_earnings: Money,
    pub total_recovered: Money,
    pub months: Vec<MonthlyBalance>,
}

impl YearlyBalance {
    /// bucket for a month number 1-12
    pub fn month(&self, month: u32) -> Option<&MonthlyBalance> {
        self.months.iter().find(|m| m.month == month)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceAggregator;

impl BalanceAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Loans are scoped by issuance: only loans created in `year` count
    /// towards `loaned`, and of those only ones paid off within `year` count
    /// towards `recovered`. Earnings are fees whose payment falls in `year`.
    #[instrument(skip(self, store))]
    pub fn yearly_balance<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        year: i32,
    ) -> Result<YearlyBalance> {
        let (start, end) = year_span(year)?;
        let mut months = all_months()?;

        for loan in store.loans_created_between(start, end)? {
            months[month_index(loan.created_at)].loaned += loan.principal;
            if loan.paid && start <= loan.updated_at && loan.updated_at <= end {
                months[month_index(loan.updated_at)].recovered += loan.principal;
            }
        }

        for fee in store.fees_paid_between(start, end)? {
            months[month_index(fee.updated_at)].earnings += fee.amount;
        }

        Ok(YearlyBalance {
            year,
            total_loaned: months.iter().map(|m| m.loaned).sum(),
            total_earnings: months.iter().map(|m| m.earnings).sum(),
            total_recovered: months.iter().map(|m| m.recovered).sum(),
            months,
        })
    }
}

fn all_months() -> Result<Vec<MonthlyBalance>> {
    (1u8..=12)
        .map(|n| {
            Month::try_from(n)
                .map(MonthlyBalance::new)
                .map_err(|_| LedgerError::InvalidDate {
                    message: format!("no month {n}"),
                })
        })
        .collect()
}

fn month_index(at: DateTime<Utc>) -> usize {
    at.month0() as usize
}
