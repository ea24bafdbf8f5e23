pub mod accrual;
pub mod balance;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod ledger;
pub mod model;
pub mod period;
pub mod requests;
pub mod settlement;
pub mod store;
pub mod types;

// re-export key types
pub use accrual::{AccrualReport, FeeAccrualEngine, LoanAccrual};
pub use balance::{BalanceAggregator, MonthlyBalance, YearlyBalance};
pub use config::{LedgerConfig, PenaltyCadence, SqliteConfig};
pub use decimal::{Money, Rate};
pub use errors::{ErrorKind, LedgerError, Result};
pub use ledger::{ActiveLoan, LoanLedger, OverdueLoan};
pub use model::{Client, Fee, FeeDraft, Loan};
pub use period::AccrualPeriod;
pub use requests::{LoanRequest, NewClient};
pub use settlement::{Settlement, SettlementGuard};
pub use store::{LedgerStore, MemoryLedger, SqliteLedger};
pub use types::{
    ClientId, FeeId, FeeKind, FeeStatus, LoanId, LoanStatus, SettlementOutcome,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
