//! SQLite store: three tables (clients, loans, fees) with amounts held as
//! decimal text and timestamps as UTC microseconds.
//!
//! Check-then-write operations run inside `IMMEDIATE` transactions, which take
//! the database write lock up front, so two processes sharing a file serialize
//! the same way two threads sharing a `SqliteLedger` do. A unique index on
//! `(loan_id, kind, period_key, source_fee_id)` backs up the accrual gate.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SqliteConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::model::{Client, Fee, FeeDraft, Loan};
use crate::settlement::check_settleable;
use crate::store::LedgerStore;
use crate::types::{ClientId, FeeId, FeeKind, LoanId, SettlementOutcome};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT NOT NULL,
    phone TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS loans (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients(id),
    principal TEXT NOT NULL,
    monthly_fee_rate TEXT NOT NULL DEFAULT '0.40',
    due_date INTEGER NOT NULL,
    paid INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS fees (
    id TEXT PRIMARY KEY,
    loan_id TEXT NOT NULL REFERENCES loans(id),
    amount TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('monthly', 'penalty')),
    source_fee_id TEXT REFERENCES fees(id),
    period_key TEXT,
    is_paid INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_fees_once_per_period
    ON fees (loan_id, kind, period_key, COALESCE(source_fee_id, ''));
CREATE INDEX IF NOT EXISTS idx_fees_loan ON fees (loan_id);
CREATE INDEX IF NOT EXISTS idx_fees_paid_at ON fees (is_paid, updated_at);
CREATE INDEX IF NOT EXISTS idx_loans_paid ON loans (paid);
CREATE INDEX IF NOT EXISTS idx_loans_created ON loans (created_at);
";

const CLIENT_COLUMNS: &str = "id, name, address, phone, created_at";
const LOAN_COLUMNS: &str =
    "id, client_id, principal, monthly_fee_rate, due_date, paid, created_at, updated_at";
const FEE_COLUMNS: &str =
    "id, loan_id, amount, kind, source_fee_id, period_key, is_paid, created_at, updated_at";

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// open or create the database file named in `config`
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let conn = Connection::open(&config.path).map_err(store_error)?;
        conn.busy_timeout(config.busy_timeout()).map_err(store_error)?;
        info!(path = %config.path.display(), "opened sqlite ledger");
        Self::setup(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::setup(Connection::open_in_memory().map_err(store_error)?)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(store_error)?;
        conn.execute_batch(SCHEMA).map_err(store_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::StoreUnavailable {
            message: "sqlite connection lock poisoned".to_string(),
        })
    }
}

/// busy, locked and I/O failures are worth retrying; constraint violations and
/// everything else are not
fn store_error(err: rusqlite::Error) -> LedgerError {
    let message = err.to_string();
    match err.sqlite_error_code() {
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::SystemIoFailure
            | ErrorCode::CannotOpen
            | ErrorCode::DiskFull,
        ) => LedgerError::StoreUnavailable { message },
        Some(ErrorCode::ConstraintViolation) => LedgerError::StoreRejected { message },
        _ => LedgerError::StoreFailed { message },
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> LedgerError {
    LedgerError::CorruptRecord {
        message: format!("bad {what}: {value}"),
    }
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// the instant as it reads back from a microsecond column
fn stored(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

fn from_micros(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| corrupt("timestamp", value))
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| corrupt("id", value))
}

fn parse_money(value: &str) -> Result<Money> {
    value.parse().map_err(|_| corrupt("amount", value))
}

struct ClientRow {
    id: String,
    name: String,
    address: String,
    phone: String,
    created_at: i64,
}

impl ClientRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            phone: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_client(self) -> Result<Client> {
        Ok(Client {
            id: parse_id(&self.id)?,
            name: self.name,
            address: self.address,
            phone: self.phone,
            created_at: from_micros(self.created_at)?,
        })
    }
}

struct LoanRow {
    id: String,
    client_id: String,
    principal: String,
    monthly_fee_rate: String,
    due_date: i64,
    paid: bool,
    created_at: i64,
    updated_at: i64,
}

impl LoanRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_id: row.get(1)?,
            principal: row.get(2)?,
            monthly_fee_rate: row.get(3)?,
            due_date: row.get(4)?,
            paid: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_loan(self) -> Result<Loan> {
        let monthly_fee_rate: Rate = self
            .monthly_fee_rate
            .parse()
            .map_err(|_| corrupt("fee rate", &self.monthly_fee_rate))?;
        Ok(Loan {
            id: parse_id(&self.id)?,
            client_id: parse_id(&self.client_id)?,
            principal: parse_money(&self.principal)?,
            monthly_fee_rate,
            due_date: from_micros(self.due_date)?,
            paid: self.paid,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
        })
    }
}

struct FeeRow {
    id: String,
    loan_id: String,
    amount: String,
    kind: String,
    source_fee_id: Option<String>,
    period_key: Option<String>,
    is_paid: bool,
    created_at: i64,
    updated_at: i64,
}

impl FeeRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            loan_id: row.get(1)?,
            amount: row.get(2)?,
            kind: row.get(3)?,
            source_fee_id: row.get(4)?,
            period_key: row.get(5)?,
            is_paid: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_fee(self) -> Result<Fee> {
        let kind: FeeKind = self.kind.parse().map_err(|_| corrupt("fee kind", &self.kind))?;
        Ok(Fee {
            id: parse_id(&self.id)?,
            loan_id: parse_id(&self.loan_id)?,
            amount: parse_money(&self.amount)?,
            kind,
            source_fee_id: self.source_fee_id.as_deref().map(parse_id).transpose()?,
            period_key: self.period_key,
            is_paid: self.is_paid,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
        })
    }
}

fn query_clients(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Client>> {
    let mut stmt = conn.prepare(sql).map_err(store_error)?;
    let rows = stmt
        .query_map(params, ClientRow::read)
        .map_err(store_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_error)?;
    rows.into_iter().map(ClientRow::into_client).collect()
}

fn query_loans(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(sql).map_err(store_error)?;
    let rows = stmt
        .query_map(params, LoanRow::read)
        .map_err(store_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_error)?;
    rows.into_iter().map(LoanRow::into_loan).collect()
}

fn query_fees(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Fee>> {
    let mut stmt = conn.prepare(sql).map_err(store_error)?;
    let rows = stmt
        .query_map(params, FeeRow::read)
        .map_err(store_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(store_error)?;
    rows.into_iter().map(FeeRow::into_fee).collect()
}

fn find_loan(conn: &Connection, id: LoanId) -> Result<Option<Loan>> {
    let sql = format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = ?1");
    Ok(query_loans(conn, &sql, params![id.to_string()])?.into_iter().next())
}

fn find_fee(conn: &Connection, id: FeeId) -> Result<Option<Fee>> {
    let sql = format!("SELECT {FEE_COLUMNS} FROM fees WHERE id = ?1");
    Ok(query_fees(conn, &sql, params![id.to_string()])?.into_iter().next())
}

fn loan_fees(conn: &Connection, loan_id: LoanId) -> Result<Vec<Fee>> {
    let sql =
        format!("SELECT {FEE_COLUMNS} FROM fees WHERE loan_id = ?1 ORDER BY created_at, id");
    query_fees(conn, &sql, params![loan_id.to_string()])
}

impl LedgerStore for SqliteLedger {
    fn insert_client(&self, mut client: Client) -> Result<Client> {
        client.created_at = stored(client.created_at);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO clients (id, name, address, phone, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                client.id.to_string(),
                client.name,
                client.address,
                client.phone,
                micros(client.created_at)
            ],
        )
        .map_err(store_error)?;
        Ok(client)
    }

    fn client(&self, id: ClientId) -> Result<Option<Client>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1");
        Ok(query_clients(&conn, &sql, params![id.to_string()])?.into_iter().next())
    }

    fn clients(&self) -> Result<Vec<Client>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients ORDER BY created_at, id");
        query_clients(&conn, &sql, [])
    }

    fn insert_loan(&self, mut loan: Loan) -> Result<Loan> {
        loan.due_date = stored(loan.due_date);
        loan.created_at = stored(loan.created_at);
        loan.updated_at = stored(loan.updated_at);

        let conn = self.lock()?;
        let client_exists: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM clients WHERE id = ?1)",
                params![loan.client_id.to_string()],
                |row| row.get(0),
            )
            .map_err(store_error)?;
        if !client_exists {
            return Err(LedgerError::ClientNotFound { id: loan.client_id });
        }

        conn.execute(
            "INSERT INTO loans
                 (id, client_id, principal, monthly_fee_rate, due_date, paid, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                loan.id.to_string(),
                loan.client_id.to_string(),
                loan.principal.as_decimal().to_string(),
                loan.monthly_fee_rate.as_decimal().to_string(),
                micros(loan.due_date),
                loan.paid,
                micros(loan.created_at),
                micros(loan.updated_at)
            ],
        )
        .map_err(store_error)?;
        Ok(loan)
    }

    fn loan(&self, id: LoanId) -> Result<Option<Loan>> {
        let conn = self.lock()?;
        find_loan(&conn, id)
    }

    fn unpaid_loans(&self) -> Result<Vec<Loan>> {
        let conn = self.lock()?;
        let sql =
            format!("SELECT {LOAN_COLUMNS} FROM loans WHERE paid = 0 ORDER BY created_at, id");
        query_loans(&conn, &sql, [])
    }

    fn fee(&self, id: FeeId) -> Result<Option<Fee>> {
        let conn = self.lock()?;
        find_fee(&conn, id)
    }

    fn fees_for_loan(&self, loan_id: LoanId) -> Result<Vec<Fee>> {
        let conn = self.lock()?;
        loan_fees(&conn, loan_id)
    }

    fn insert_fee_once(&self, draft: FeeDraft) -> Result<Option<Fee>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error)?;

        let loan_paid: Option<bool> = tx
            .query_row(
                "SELECT paid FROM loans WHERE id = ?1",
                params![draft.loan_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_error)?;
        match loan_paid {
            None => return Err(LedgerError::LoanNotFound { id: draft.loan_id }),
            Some(true) => return Ok(None),
            Some(false) => {}
        }

        if let Some(source_id) = draft.source_fee_id {
            let source =
                find_fee(&tx, source_id)?.ok_or(LedgerError::FeeNotFound { id: source_id })?;
            if source.is_paid || source.kind != FeeKind::Monthly {
                return Ok(None);
            }
        }

        if let Some(period) = draft.period {
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS (
                        SELECT 1 FROM fees
                        WHERE loan_id = ?1 AND kind = ?2 AND COALESCE(source_fee_id, '') = ?3
                          AND created_at BETWEEN ?4 AND ?5
                    )",
                    params![
                        draft.loan_id.to_string(),
                        draft.kind.as_str(),
                        draft.source_fee_id.map(|id| id.to_string()).unwrap_or_default(),
                        micros(period.start()?),
                        micros(period.end()?)
                    ],
                    |row| row.get(0),
                )
                .map_err(store_error)?;
            if exists {
                return Ok(None);
            }
        }

        let mut fee = Fee::from_draft(&draft);
        fee.created_at = stored(fee.created_at);
        fee.updated_at = stored(fee.updated_at);
        let inserted = tx.execute(
            "INSERT INTO fees
                 (id, loan_id, amount, kind, source_fee_id, period_key, is_paid, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                fee.id.to_string(),
                fee.loan_id.to_string(),
                fee.amount.as_decimal().to_string(),
                fee.kind.as_str(),
                fee.source_fee_id.map(|id| id.to_string()),
                fee.period_key,
                fee.is_paid,
                micros(fee.created_at),
                micros(fee.updated_at)
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if draft.period.is_some() && is_constraint_violation(&err) => {
                debug!(
                    loan_id = %draft.loan_id,
                    kind = %draft.kind,
                    "fee already charged for period"
                );
                return Ok(None);
            }
            Err(err) => return Err(store_error(err)),
        }
        tx.commit().map_err(store_error)?;
        Ok(Some(fee))
    }

    fn mark_fee_paid(&self, id: FeeId, at: DateTime<Utc>) -> Result<(Fee, SettlementOutcome)> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error)?;

        let mut fee = find_fee(&tx, id)?.ok_or(LedgerError::FeeNotFound { id })?;
        if fee.is_paid {
            return Ok((fee, SettlementOutcome::AlreadyPaid));
        }

        tx.execute(
            "UPDATE fees SET is_paid = 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), micros(at)],
        )
        .map_err(store_error)?;
        tx.commit().map_err(store_error)?;

        fee.is_paid = true;
        fee.updated_at = stored(at);
        Ok((fee, SettlementOutcome::Applied))
    }

    fn settle_loan(&self, id: LoanId, at: DateTime<Utc>) -> Result<(Loan, SettlementOutcome)> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(store_error)?;

        let mut loan = find_loan(&tx, id)?.ok_or(LedgerError::LoanNotFound { id })?;
        if loan.paid {
            return Ok((loan, SettlementOutcome::AlreadyPaid));
        }
        check_settleable(&loan, &loan_fees(&tx, id)?)?;

        tx.execute(
            "UPDATE loans SET paid = 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), micros(at)],
        )
        .map_err(store_error)?;
        tx.commit().map_err(store_error)?;

        loan.paid = true;
        loan.updated_at = stored(at);
        Ok((loan, SettlementOutcome::Applied))
    }

    fn loans_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Loan>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM loans
             WHERE created_at BETWEEN ?1 AND ?2
             ORDER BY created_at, id"
        );
        query_loans(&conn, &sql, params![micros(start), micros(end)])
    }

    fn fees_paid_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Fee>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {FEE_COLUMNS} FROM fees
             WHERE is_paid = 1 AND updated_at BETWEEN ?1 AND ?2
             ORDER BY updated_at, id"
        );
        query_fees(&conn, &sql, params![micros(start), micros(end)])
    }
}
