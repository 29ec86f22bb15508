//! DuckDB card store
//!
//! DuckDB has no `SELECT ... FOR UPDATE`, so row locking is coarse: a
//! transaction owns the single connection from its first lock until commit or
//! rollback. Waiting for the connection is bounded by the lock timeout and
//! surfaces as `LockTimeout`, the same as a contended row in a row-locking
//! database.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use duckdb::{params, Connection, Params};
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::{Card, CardId, CardStatus, NewCard, Owner, OwnerId};
use crate::ports::{CardStore, CardTransaction, OwnerDirectory};
use crate::services::{MigrationResult, MigrationService};

use super::DEFAULT_LOCK_TIMEOUT;

/// Maximum number of retries when the database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Upper bound for a single sleep while polling the connection lock
const MAX_LOCK_POLL: Duration = Duration::from_millis(25);

const CARD_COLUMNS: &str = "id, owner_id, number_encrypted, status, valid_until::VARCHAR, \
                            balance::VARCHAR, created_at::VARCHAR, updated_at::VARCHAR";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_open_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Map a write failure, turning unique violations on the number column into
/// `CardNumberTaken`
fn map_write_error(e: duckdb::Error) -> Error {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("duplicate key") || lower.contains("unique constraint") {
        Error::CardNumberTaken
    } else {
        Error::Database(msg)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|dt| dt.and_utc())
        .map_err(|e| Error::database(format!("bad timestamp '{}': {}", s, e)))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::database(format!("bad date '{}': {}", s, e)))
}

/// Raw card row as read from DuckDB; dates and decimals come back as text
struct CardRow {
    id: i64,
    owner_id: i64,
    number_encrypted: String,
    status: String,
    valid_until: String,
    balance: String,
    created_at: String,
    updated_at: String,
}

impl CardRow {
    fn read(row: &duckdb::Row) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            number_encrypted: row.get(2)?,
            status: row.get(3)?,
            valid_until: row.get(4)?,
            balance: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        let balance = Decimal::from_str(&self.balance)
            .map_err(|e| Error::database(format!("bad balance '{}': {}", self.balance, e)))?;
        Ok(Card {
            id: self.id,
            owner_id: self.owner_id,
            number_encrypted: self.number_encrypted,
            status: self.status.parse()?,
            valid_until: parse_date(&self.valid_until)?,
            balance,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn query_cards<P: Params>(conn: &Connection, filter: &str, params: P) -> Result<Vec<Card>> {
    let sql = format!("SELECT {} FROM sys_cards {} ORDER BY id", CARD_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, CardRow::read)?;

    let mut cards = Vec::new();
    for row in rows {
        cards.push(row?.into_card()?);
    }
    Ok(cards)
}

fn query_card<P: Params>(conn: &Connection, filter: &str, params: P) -> Result<Option<Card>> {
    Ok(query_cards(conn, filter, params)?.into_iter().next())
}

/// DuckDB-backed card store
pub struct DuckDbCardStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    lock_timeout: Duration,
}

impl DuckDbCardStore {
    /// Open (or create) the database at `db_path`
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                        lock_timeout: DEFAULT_LOCK_TIMEOUT,
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_open_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            "database busy, retrying: {}",
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::database(format!("failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory_with_flags(config)?),
            db_path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; nothing here needs one
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    /// Set how long a transaction waits for the connection
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run pending schema migrations
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure the schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        let result = self.run_migrations()?;
        if !result.applied.is_empty() {
            tracing::info!(applied = ?result.applied, "applied schema migrations");
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("connection mutex poisoned"))
    }

    /// Acquire the connection for a transaction that is about to lock `id`
    fn acquire_for_lock(&self, id: CardId) -> Result<MutexGuard<'_, Connection>> {
        let deadline = Instant::now() + self.lock_timeout;
        let mut pause = Duration::from_millis(1);
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(Error::database("connection mutex poisoned"));
                }
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::LockTimeout(id));
                    }
                    thread::sleep(pause.min(deadline - now));
                    pause = (pause * 2).min(MAX_LOCK_POLL);
                }
            }
        }
    }

    // === Owner operations ===

    /// Register a new owner with the next free id
    pub fn add_owner(&self, username: &str) -> Result<Owner> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::validation("username cannot be empty"));
        }

        let conn = self.conn()?;
        let id: i64 = conn
            .query_row(
                "INSERT INTO sys_owners (id, username) VALUES (nextval('seq_owner_id'), ?) RETURNING id",
                [username],
                |row| row.get(0),
            )
            .map_err(|e| match map_write_error(e) {
                Error::CardNumberTaken => Error::validation(format!("username '{}' is already taken", username)),
                other => other,
            })?;

        Ok(Owner::new(id, username))
    }

    pub fn list_owners(&self) -> Result<Vec<Owner>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, username FROM sys_owners ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok(Owner::new(row.get(0)?, row.get::<_, String>(1)?)))?;

        let mut owners = Vec::new();
        for owner in rows {
            owners.push(owner?);
        }
        Ok(owners)
    }
}

impl OwnerDirectory for DuckDbCardStore {
    fn owner_exists(&self, owner_id: OwnerId) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_owners WHERE id = ?", [owner_id], |row| {
            row.get(0)
        })?;
        Ok(count > 0)
    }
}

impl CardStore for DuckDbCardStore {
    fn find_by_id(&self, id: CardId) -> Result<Option<Card>> {
        query_card(&*self.conn()?, "WHERE id = ?", [id])
    }

    fn find_by_encrypted_number(&self, number_encrypted: &str) -> Result<Option<Card>> {
        query_card(&*self.conn()?, "WHERE number_encrypted = ?", [number_encrypted])
    }

    fn find_by_encrypted_number_and_owner(
        &self,
        number_encrypted: &str,
        owner_id: OwnerId,
    ) -> Result<Option<Card>> {
        query_card(
            &*self.conn()?,
            "WHERE number_encrypted = ? AND owner_id = ?",
            params![number_encrypted, owner_id],
        )
    }

    fn list_all(&self) -> Result<Vec<Card>> {
        query_cards(&*self.conn()?, "", [])
    }

    fn list_by_owner(&self, owner_id: OwnerId) -> Result<Vec<Card>> {
        query_cards(&*self.conn()?, "WHERE owner_id = ?", [owner_id])
    }

    fn insert(&self, card: NewCard) -> Result<Card> {
        // DuckDB keeps microseconds; trim now so the returned card matches a re-read
        let mut card = card.into_card(0);
        card.created_at = card.created_at.trunc_subsecs(6);
        card.updated_at = card.created_at;

        let conn = self.conn()?;
        card.id = conn
            .query_row(
                "INSERT INTO sys_cards
                    (id, owner_id, number_encrypted, status, valid_until, balance, created_at, updated_at)
                 VALUES (nextval('seq_card_id'), ?, ?, ?, ?::DATE, ?::DECIMAL(15,2), ?::TIMESTAMP, ?::TIMESTAMP)
                 RETURNING id",
                params![
                    card.owner_id,
                    card.number_encrypted,
                    card.status.as_str(),
                    card.valid_until.to_string(),
                    card.balance.to_string(),
                    format_timestamp(&card.created_at),
                    format_timestamp(&card.updated_at),
                ],
                |row| row.get(0),
            )
            .map_err(map_write_error)?;

        Ok(card)
    }

    fn delete(&self, id: CardId) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM sys_cards WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    fn begin(&self) -> Result<Box<dyn CardTransaction + '_>> {
        Ok(Box::new(DuckDbTransaction {
            store: self,
            conn: None,
            locked: std::collections::BTreeMap::new(),
        }))
    }

    fn bulk_mark_expired(&self, from: &[CardStatus], to: CardStatus, today: NaiveDate) -> Result<u64> {
        if from.is_empty() {
            return Ok(0);
        }

        // Status names are fixed enum literals, safe to inline
        let statuses = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE sys_cards SET status = ?, updated_at = ?::TIMESTAMP
             WHERE status IN ({}) AND valid_until < ?::DATE",
            statuses
        );

        let now = Utc::now().trunc_subsecs(6);
        let conn = self.conn()?;
        let changed = conn.execute(&sql, params![to.as_str(), format_timestamp(&now), today.to_string()])?;
        Ok(changed as u64)
    }
}

/// Transaction over [`DuckDbCardStore`]
///
/// The connection is taken on the first lock call and held until commit or drop.
pub struct DuckDbTransaction<'a> {
    store: &'a DuckDbCardStore,
    conn: Option<MutexGuard<'a, Connection>>,
    /// Snapshot of every row locked so far, as last saved
    locked: std::collections::BTreeMap<CardId, Card>,
}

impl DuckDbTransaction<'_> {
    fn connection(&mut self, id: CardId) -> Result<&Connection> {
        if self.conn.is_none() {
            let guard = self.store.acquire_for_lock(id)?;
            guard.execute_batch("BEGIN TRANSACTION")?;
            self.conn = Some(guard);
        }
        self.conn
            .as_deref()
            .ok_or_else(|| Error::database("transaction has no connection"))
    }

    fn lock_where<P: Params>(&mut self, id: CardId, filter: &str, params: P) -> Result<Option<Card>> {
        let card = query_card(self.connection(id)?, filter, params)?;
        if let Some(card) = &card {
            self.locked.insert(card.id, card.clone());
        }
        Ok(card)
    }
}

impl CardTransaction for DuckDbTransaction<'_> {
    fn lock_by_id_owner_and_status(
        &mut self,
        id: CardId,
        owner_id: OwnerId,
        status: CardStatus,
    ) -> Result<Option<Card>> {
        self.lock_where(
            id,
            "WHERE id = ? AND owner_id = ? AND status = ?",
            params![id, owner_id, status.as_str()],
        )
    }

    fn lock_by_id(&mut self, id: CardId) -> Result<Option<Card>> {
        self.lock_where(id, "WHERE id = ?", [id])
    }

    fn save(&mut self, card: &Card) -> Result<Card> {
        let Some(previous) = self.locked.get(&card.id) else {
            return Err(Error::database(format!(
                "card id = {} is not locked by this transaction",
                card.id
            )));
        };
        card.validate().map_err(Error::validation)?;
        let number_changed = previous.number_encrypted != card.number_encrypted;

        let mut saved = card.clone();
        saved.updated_at = Utc::now().trunc_subsecs(6);

        let conn = self.connection(card.id)?;
        conn.execute(
            "UPDATE sys_cards
             SET owner_id = ?, status = ?, valid_until = ?::DATE,
                 balance = ?::DECIMAL(15,2), updated_at = ?::TIMESTAMP
             WHERE id = ?",
            params![
                saved.owner_id,
                saved.status.as_str(),
                saved.valid_until.to_string(),
                saved.balance.to_string(),
                format_timestamp(&saved.updated_at),
                saved.id,
            ],
        )
        .map_err(map_write_error)?;

        // Touch the UNIQUE column only when it changed
        if number_changed {
            conn.execute(
                "UPDATE sys_cards SET number_encrypted = ? WHERE id = ?",
                params![saved.number_encrypted, saved.id],
            )
            .map_err(map_write_error)?;
        }

        self.locked.insert(saved.id, saved.clone());
        Ok(saved)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(map_write_error(e));
        }
        Ok(())
    }
}

impl Drop for DuckDbTransaction<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("rollback failed: {}", e);
            }
        }
    }
}
