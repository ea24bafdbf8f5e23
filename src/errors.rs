use thiserror::Error;

use crate::decimal::Money;
use crate::types::{ClientId, FeeId, LoanId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("invalid date: {message}")]
    InvalidDate {
        message: String,
    },

    #[error("client not found: {id}")]
    ClientNotFound {
        id: ClientId,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: LoanId,
    },

    #[error("fee not found: {id}")]
    FeeNotFound {
        id: FeeId,
    },

    #[error("cannot pay loan {loan_id} until all fees are paid: {unpaid_count} outstanding totalling {unpaid_total}")]
    FeesOutstanding {
        loan_id: LoanId,
        unpaid_count: usize,
        unpaid_total: Money,
    },

    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
    },

    /// the store refused a write that breaks one of its constraints
    #[error("store rejected write: {message}")]
    StoreRejected {
        message: String,
    },

    /// non-transient store failure such as malformed sql
    #[error("store failed: {message}")]
    StoreFailed {
        message: String,
    },

    #[error("corrupt record: {message}")]
    CorruptRecord {
        message: String,
    },
}

/// broad failure classes callers map onto their own transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    StoreUnavailable,
}

impl LedgerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation { .. }
            | LedgerError::InvalidConfiguration { .. }
            | LedgerError::InvalidDate { .. } => ErrorKind::Validation,
            LedgerError::ClientNotFound { .. }
            | LedgerError::LoanNotFound { .. }
            | LedgerError::FeeNotFound { .. } => ErrorKind::NotFound,
            LedgerError::FeesOutstanding { .. } | LedgerError::StoreRejected { .. } => {
                ErrorKind::Conflict
            }
            LedgerError::StoreUnavailable { .. }
            | LedgerError::StoreFailed { .. }
            | LedgerError::CorruptRecord { .. } => ErrorKind::StoreUnavailable,
        }
    }

    /// transient infrastructure failure; the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
