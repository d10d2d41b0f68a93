use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lumentip_core::{Address, Amount};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};

use crate::records::{
    Account, ActionKind, ActionRecord, NewAction, NewTransaction, TransactionKind,
    TransactionRecord,
};
use crate::{LedgerError, LedgerResult};

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    adapter TEXT NOT NULL,
    unique_id TEXT NOT NULL,
    balance TEXT NOT NULL,
    wallet_address TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (adapter, unique_id)
);
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    hash TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    cursor TEXT,
    memo TEXT,
    amount TEXT NOT NULL,
    asset TEXT NOT NULL,
    credited INTEGER NOT NULL DEFAULT 0,
    refunded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS transactions_idx_kind_created
    ON transactions(kind, created_at);
CREATE TABLE IF NOT EXISTS actions (
    id INTEGER PRIMARY KEY,
    hash TEXT NOT NULL,
    kind TEXT NOT NULL,
    source_account_id INTEGER REFERENCES accounts(id),
    target_account_id INTEGER REFERENCES accounts(id),
    amount TEXT NOT NULL,
    address TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (hash, kind)
);
CREATE INDEX IF NOT EXISTS actions_idx_source ON actions(source_account_id);
CREATE INDEX IF NOT EXISTS actions_idx_target ON actions(target_account_id);
"#;

/// SQLite store holding accounts, chain transactions, and actions.
///
/// A single connection sits behind a mutex; every balance-affecting
/// operation runs inside one `BEGIN IMMEDIATE` transaction on it, so
/// concurrent engines serialize instead of interleaving.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        Self::initialize(conn)
    }

    /// Private scratch database, used by tests and dry runs.
    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> LedgerResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(STORE_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Most recent chain transactions, newest first, optionally
    /// narrowed to one kind. Read-only; meant for operator tooling.
    pub fn recent_transactions(
        &self,
        kind: Option<TransactionKind>,
        limit: usize,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        recent_transactions(&self.conn(), kind, limit)
    }
}

pub(crate) fn insert_account(
    conn: &Connection,
    adapter: &str,
    unique_id: &str,
) -> LedgerResult<Account> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO accounts (adapter, unique_id, balance, wallet_address, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4)",
        params![
            adapter,
            unique_id,
            Amount::zero().to_fixed(),
            created_at.to_rfc3339()
        ],
    )?;
    Ok(Account {
        id: conn.last_insert_rowid(),
        adapter: adapter.to_string(),
        unique_id: unique_id.to_string(),
        balance: Amount::zero(),
        wallet_address: None,
        created_at,
    })
}

pub(crate) fn account_by_ref(
    conn: &Connection,
    adapter: &str,
    unique_id: &str,
) -> LedgerResult<Option<Account>> {
    conn.query_row(
        "SELECT id, adapter, unique_id, balance, wallet_address, created_at
         FROM accounts WHERE adapter = ?1 AND unique_id = ?2",
        params![adapter, unique_id],
        row_to_account,
    )
    .optional()
    .map_err(LedgerError::from)
}

pub(crate) fn get_or_create_account(
    conn: &Connection,
    adapter: &str,
    unique_id: &str,
) -> LedgerResult<Account> {
    match account_by_ref(conn, adapter, unique_id)? {
        Some(existing) => Ok(existing),
        None => {
            tracing::debug!(%adapter, %unique_id, "creating account");
            insert_account(conn, adapter, unique_id)
        }
    }
}

pub(crate) fn account_by_id(conn: &Connection, id: i64) -> LedgerResult<Option<Account>> {
    conn.query_row(
        "SELECT id, adapter, unique_id, balance, wallet_address, created_at
         FROM accounts WHERE id = ?1",
        params![id],
        row_to_account,
    )
    .optional()
    .map_err(LedgerError::from)
}

/// Account bound to a wallet address. Registration keeps the binding
/// unique, so the first match is the only match.
pub(crate) fn account_by_wallet(conn: &Connection, address: &str) -> LedgerResult<Option<Account>> {
    conn.query_row(
        "SELECT id, adapter, unique_id, balance, wallet_address, created_at
         FROM accounts WHERE wallet_address = ?1 LIMIT 1",
        params![address],
        row_to_account,
    )
    .optional()
    .map_err(LedgerError::from)
}

pub(crate) fn update_balance(conn: &Connection, id: i64, balance: Amount) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = ?2",
        params![balance.to_fixed(), id],
    )?;
    if changed == 0 {
        return Err(LedgerError::InvalidState(format!("no account with id {id}")));
    }
    Ok(())
}

pub(crate) fn set_wallet_address(
    conn: &Connection,
    id: i64,
    address: &Address,
) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE accounts SET wallet_address = ?1 WHERE id = ?2",
        params![address.as_str(), id],
    )?;
    if changed == 0 {
        return Err(LedgerError::InvalidState(format!("no account with id {id}")));
    }
    Ok(())
}

pub(crate) fn all_accounts(conn: &Connection) -> LedgerResult<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, adapter, unique_id, balance, wallet_address, created_at
         FROM accounts ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut accounts = Vec::new();
    while let Some(row) = rows.next()? {
        accounts.push(row_to_account(row)?);
    }
    Ok(accounts)
}

fn run_transaction_insert(
    conn: &Connection,
    new: &NewTransaction,
) -> rusqlite::Result<TransactionRecord> {
    conn.execute(
        "INSERT INTO transactions (
            hash, kind, source, target, cursor, memo, amount, asset, credited, refunded, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            new.hash,
            new.kind.as_str(),
            new.source,
            new.target,
            new.cursor,
            new.memo,
            new.amount.to_fixed(),
            new.asset,
            new.credited,
            new.refunded,
            new.created_at.to_rfc3339()
        ],
    )?;
    Ok(TransactionRecord {
        id: conn.last_insert_rowid(),
        hash: new.hash.clone(),
        kind: new.kind,
        source: new.source.clone(),
        target: new.target.clone(),
        cursor: new.cursor.clone(),
        memo: new.memo.clone(),
        amount: new.amount,
        asset: new.asset.clone(),
        credited: new.credited,
        refunded: new.refunded,
        created_at: new.created_at,
    })
}

pub(crate) fn insert_transaction(
    conn: &Connection,
    new: &NewTransaction,
) -> LedgerResult<TransactionRecord> {
    run_transaction_insert(conn, new).map_err(LedgerError::from)
}

/// Inserts the transaction unless its hash is already persisted.
/// `None` means the uniqueness index fired; any other failure is a
/// real storage error.
pub(crate) fn insert_transaction_if_new(
    conn: &Connection,
    new: &NewTransaction,
) -> LedgerResult<Option<TransactionRecord>> {
    match run_transaction_insert(conn, new) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::SqliteFailure(code, _))
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn transaction_by_hash(
    conn: &Connection,
    hash: &str,
) -> LedgerResult<Option<TransactionRecord>> {
    conn.query_row(
        "SELECT id, hash, kind, source, target, cursor, memo, amount, asset, credited, refunded, created_at
         FROM transactions WHERE hash = ?1",
        params![hash],
        row_to_transaction,
    )
    .optional()
    .map_err(LedgerError::from)
}

/// Paging token of the most recently persisted payment, the point the
/// feed resumes from after a restart.
pub(crate) fn latest_cursor(conn: &Connection) -> LedgerResult<Option<String>> {
    conn.query_row(
        "SELECT cursor FROM transactions WHERE cursor IS NOT NULL ORDER BY id DESC LIMIT 1",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(LedgerError::from)
}

/// Deposits that were neither credited nor refunded, oldest first.
/// These are refunds whose submission failed on an earlier pass.
pub(crate) fn unprocessed_deposits(conn: &Connection) -> LedgerResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, hash, kind, source, target, cursor, memo, amount, asset, credited, refunded, created_at
         FROM transactions
         WHERE kind = 'deposit' AND credited = 0 AND refunded = 0
         ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut deposits = Vec::new();
    while let Some(row) = rows.next()? {
        deposits.push(row_to_transaction(row)?);
    }
    Ok(deposits)
}

pub(crate) fn recent_transactions(
    conn: &Connection,
    kind: Option<TransactionKind>,
    limit: usize,
) -> LedgerResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, hash, kind, source, target, cursor, memo, amount, asset, credited, refunded, created_at
         FROM transactions
         WHERE (?1 IS NULL OR kind = ?1)
         ORDER BY id DESC LIMIT ?2",
    )?;
    let mut rows = stmt.query(params![kind.map(|k| k.as_str()), limit as i64])?;
    let mut transactions = Vec::new();
    while let Some(row) = rows.next()? {
        transactions.push(row_to_transaction(row)?);
    }
    Ok(transactions)
}

pub(crate) fn mark_refunded(conn: &Connection, id: i64) -> LedgerResult<()> {
    conn.execute(
        "UPDATE transactions SET refunded = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub(crate) fn rewrite_transaction_hash(
    conn: &Connection,
    id: i64,
    hash: &str,
) -> LedgerResult<()> {
    conn.execute(
        "UPDATE transactions SET hash = ?1 WHERE id = ?2",
        params![hash, id],
    )?;
    Ok(())
}

pub(crate) fn delete_transaction(conn: &Connection, id: i64) -> LedgerResult<()> {
    conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn insert_action(conn: &Connection, new: &NewAction) -> LedgerResult<ActionRecord> {
    conn.execute(
        "INSERT INTO actions (
            hash, kind, source_account_id, target_account_id, amount, address, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.hash,
            new.kind.as_str(),
            new.source_account_id,
            new.target_account_id,
            new.amount.to_fixed(),
            new.address,
            new.created_at.to_rfc3339()
        ],
    )?;
    Ok(ActionRecord {
        id: conn.last_insert_rowid(),
        hash: new.hash.clone(),
        kind: new.kind,
        source_account_id: new.source_account_id,
        target_account_id: new.target_account_id,
        amount: new.amount,
        address: new.address.clone(),
        created_at: new.created_at,
    })
}

pub(crate) fn action_exists(conn: &Connection, hash: &str, kind: ActionKind) -> LedgerResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM actions WHERE hash = ?1 AND kind = ?2",
            params![hash, kind.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn delete_action(conn: &Connection, id: i64) -> LedgerResult<()> {
    conn.execute("DELETE FROM actions WHERE id = ?1", params![id])?;
    Ok(())
}

pub(crate) fn account_actions(
    conn: &Connection,
    account_id: i64,
    limit: usize,
) -> LedgerResult<Vec<ActionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, hash, kind, source_account_id, target_account_id, amount, address, created_at
         FROM actions
         WHERE source_account_id = ?1 OR target_account_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;
    let mut rows = stmt.query(params![account_id, limit as i64])?;
    let mut actions = Vec::new();
    while let Some(row) = rows.next()? {
        actions.push(row_to_action(row)?);
    }
    Ok(actions)
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let balance_str: String = row.get(3)?;
    let address_str: Option<String> = row.get(4)?;
    let created_str: String = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        adapter: row.get(1)?,
        unique_id: row.get(2)?,
        balance: parse_amount(3, &balance_str)?,
        wallet_address: address_str.map(|raw| parse_address(4, &raw)).transpose()?,
        created_at: parse_timestamp(5, &created_str)?,
    })
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let kind_str: String = row.get(2)?;
    let amount_str: String = row.get(7)?;
    let created_str: String = row.get(11)?;
    Ok(TransactionRecord {
        id: row.get(0)?,
        hash: row.get(1)?,
        kind: parse_kind::<TransactionKind>(2, &kind_str)?,
        source: row.get(3)?,
        target: row.get(4)?,
        cursor: row.get(5)?,
        memo: row.get(6)?,
        amount: parse_amount(7, &amount_str)?,
        asset: row.get(8)?,
        credited: row.get(9)?,
        refunded: row.get(10)?,
        created_at: parse_timestamp(11, &created_str)?,
    })
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRecord> {
    let kind_str: String = row.get(2)?;
    let amount_str: String = row.get(5)?;
    let created_str: String = row.get(7)?;
    Ok(ActionRecord {
        id: row.get(0)?,
        hash: row.get(1)?,
        kind: parse_kind::<ActionKind>(2, &kind_str)?,
        source_account_id: row.get(3)?,
        target_account_id: row.get(4)?,
        amount: parse_amount(5, &amount_str)?,
        address: row.get(6)?,
        created_at: parse_timestamp(7, &created_str)?,
    })
}

fn column_error(index: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_amount(index: usize, raw: &str) -> rusqlite::Result<Amount> {
    Amount::parse(raw).map_err(|err| column_error(index, err))
}

fn parse_address(index: usize, raw: &str) -> rusqlite::Result<Address> {
    Address::parse(raw).map_err(|err| column_error(index, err))
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| column_error(index, err))
}

fn parse_kind<T: FromStr<Err = String>>(index: usize, raw: &str) -> rusqlite::Result<T> {
    T::from_str(raw).map_err(|err| {
        column_error(
            index,
            std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        )
    })
}
