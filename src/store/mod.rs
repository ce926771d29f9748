//! Participant store: the per-node facade over the local transactional
//! database.
//!
//! The store owns the map of in-progress prepared transactions and the
//! durable audit table (`distributed_tx`) that tracks every transaction's
//! status. Prepare applies the payload inside an open database transaction
//! and records a `PREPARED` audit row; commit and abort resolve the open
//! transaction and leave a `COMMITTED` or `ABORTED` row behind.
//!
//! One dedicated connection carries each in-flight prepared transaction.
//! `rusqlite`'s borrowed transaction type cannot be parked in a map across
//! RPCs, so the store drives the transaction with explicit `BEGIN IMMEDIATE`
//! / `COMMIT` / `ROLLBACK` statements and keeps the owning connection in the
//! pending map until the coordinator resolves it.

pub mod sql;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use crate::protocol::{NodeMetrics, TransactionRecord, TxStatus};
use sql::{PayloadError, SqlAction};

/// How long a connection waits on the database write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled connections for audit reads and idempotent status updates.
const POOL_SIZE: u32 = 4;

/// Default and maximum page sizes for transaction listing.
const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

const AUDIT_DDL: &str = "CREATE TABLE IF NOT EXISTS distributed_tx (
    tx_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Errors raised by the participant store.
#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("failed to open datasource at {}: {source}", path.display()))]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[snafu(display("failed to create directory {}: {source}", path.display()))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to build read pool: {source}"))]
    PoolBuild { source: r2d2::Error },

    #[snafu(display("read pool exhausted: {source}"))]
    Pool { source: r2d2::Error },

    #[snafu(display("failed to begin transaction: {source}"))]
    Begin { source: rusqlite::Error },

    #[snafu(display("failed to execute statement: {source}"))]
    Execute { source: rusqlite::Error },

    #[snafu(display("failed to query audit table: {source}"))]
    Query { source: rusqlite::Error },

    #[snafu(display("failed to write audit row: {source}"))]
    Audit { source: rusqlite::Error },

    #[snafu(display("failed to commit transaction: {source}"))]
    Commit { source: rusqlite::Error },

    #[snafu(display("failed to roll back transaction: {source}"))]
    Rollback { source: rusqlite::Error },

    #[snafu(display("invalid payload: {source}"))]
    Payload { source: PayloadError },

    #[snafu(display("failed to serialise payload: {source}"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("transaction {tx_id} already in progress"))]
    TransactionBusy { tx_id: String },

    #[snafu(display("transaction {tx_id} already exists"))]
    DuplicateTransaction { tx_id: String },
}

impl StoreError {
    /// True for the duplicate-id rejections that make a prepare retry futile.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StoreError::TransactionBusy { .. } | StoreError::DuplicateTransaction { .. }
        )
    }
}

/// An in-flight prepared transaction.
///
/// `conn` holds the open database transaction while the store runs against a
/// datasource; in in-memory mode only the payload is retained.
struct PreparedTx {
    payload: Value,
    conn: Option<Connection>,
}

#[derive(Default)]
struct Counters {
    prepared: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    failed: AtomicU64,
}

struct Datasource {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
}

/// Rolls the open transaction back on drop unless the caller keeps it open.
struct OpenTx<'a> {
    conn: &'a Connection,
    armed: bool,
}

impl<'a> OpenTx<'a> {
    fn begin(conn: &'a Connection) -> Result<Self, StoreError> {
        conn.execute_batch("BEGIN IMMEDIATE").context(BeginSnafu)?;
        Ok(Self { conn, armed: true })
    }

    /// Leave the transaction open; the pending map now owns its fate.
    fn keep_open(mut self) {
        self.armed = false;
    }
}

impl Drop for OpenTx<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

/// Per-node prepared-transaction store.
pub struct ParticipantStore {
    addr: String,
    datasource: Option<Datasource>,
    pending: Mutex<HashMap<String, PreparedTx>>,
    counters: Counters,
}

impl ParticipantStore {
    /// Open a store backed by the SQLite database at `path`, creating the
    /// audit table if missing.
    pub fn open(addr: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context(CreateDirectorySnafu { path: parent })?;
            }
        }

        let conn = Connection::open(&path).context(OpenDatabaseSnafu { path: &path })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context(ExecuteSnafu)?;
        ensure_schema(&conn)?;

        let manager = SqliteConnectionManager::file(&path)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .context(PoolBuildSnafu)?;

        Ok(Self {
            addr: addr.into(),
            datasource: Some(Datasource { path, pool }),
            pending: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        })
    }

    /// Open a store with no datasource; payloads are held in memory only.
    pub fn in_memory(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            datasource: None,
            pending: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Node address this store belongs to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether a datasource is attached.
    pub fn has_datasource(&self) -> bool {
        self.datasource.is_some()
    }

    /// Whether `tx_id` is currently prepared and unresolved.
    pub fn is_pending(&self, tx_id: &str) -> bool {
        self.pending.lock().contains_key(tx_id)
    }

    /// Ids of all currently prepared transactions, sorted.
    pub fn pending_transactions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of the store's transaction counters.
    pub fn metrics(&self) -> NodeMetrics {
        NodeMetrics {
            prepared: self.counters.prepared.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            aborted: self.counters.aborted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            in_flight: self.pending.lock().len() as u64,
        }
    }

    /// Prepare phase: apply the payload inside a new database transaction and
    /// record a `PREPARED` audit row, leaving the transaction open.
    ///
    /// Rejects a transaction id that is already pending or already present in
    /// the audit table; any parse, validation, or SQL failure rolls the
    /// transaction back and is returned to the caller.
    pub fn prepare(&self, tx_id: &str, payload: &Value) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();

        if pending.contains_key(tx_id) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return TransactionBusySnafu { tx_id }.fail();
        }

        match self.prepare_tx(tx_id, payload) {
            Ok(conn) => {
                pending.insert(
                    tx_id.to_string(),
                    PreparedTx {
                        payload: payload.clone(),
                        conn,
                    },
                );
                self.counters.prepared.fetch_add(1, Ordering::Relaxed);
                tracing::info!(addr = %self.addr, tx_id, "prepared transaction");
                Ok(())
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(addr = %self.addr, tx_id, error = %err, "prepare failed");
                Err(err)
            }
        }
    }

    fn prepare_tx(&self, tx_id: &str, payload: &Value) -> Result<Option<Connection>, StoreError> {
        let Some(ds) = &self.datasource else {
            return Ok(None);
        };

        let conn = Connection::open(&ds.path).context(OpenDatabaseSnafu { path: &ds.path })?;
        conn.busy_timeout(BUSY_TIMEOUT).context(ExecuteSnafu)?;
        ensure_schema(&conn)?;

        let open = OpenTx::begin(&conn)?;

        let action = SqlAction::parse(payload).context(PayloadSnafu)?;
        let (stmt, bound) = action.statement().context(PayloadSnafu)?;
        conn.execute(&stmt, params_from_iter(bound))
            .context(ExecuteSnafu)?;

        let payload_json = serde_json::to_string(payload).context(SerializeSnafu)?;
        let now = Utc::now().to_rfc3339();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO distributed_tx (tx_id, payload, status, created_at, updated_at)
                 VALUES (?1, ?2, 'PREPARED', ?3, ?3)",
                params![tx_id, payload_json, now],
            )
            .context(AuditSnafu)?;
        if inserted == 0 {
            // A row for this id already exists; the open transaction rolls
            // back via the guard.
            return DuplicateTransactionSnafu { tx_id }.fail();
        }

        open.keep_open();
        Ok(Some(conn))
    }

    /// Commit phase: mark the audit row `COMMITTED` and commit the open
    /// database transaction.
    ///
    /// With no open transaction but a datasource attached, the call is
    /// treated as an idempotent replay and only refreshes the audit row.
    /// Errors that say the transaction was already finalised are swallowed.
    pub fn commit(&self, tx_id: &str) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();

        if let Some(ptx) = pending.remove(tx_id) {
            if let Some(conn) = &ptx.conn {
                let now = Utc::now().to_rfc3339();
                if let Err(err) = conn.execute(
                    "UPDATE distributed_tx SET status='COMMITTED', updated_at=?2 WHERE tx_id=?1",
                    params![tx_id, now],
                ) {
                    if !is_already_finished(&err) {
                        let _ = conn.execute_batch("ROLLBACK");
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(addr = %self.addr, tx_id, error = %err, "commit failed, rolled back");
                        return Err(StoreError::Audit { source: err });
                    }
                }
                if let Err(err) = conn.execute_batch("COMMIT") {
                    if !is_already_finished(&err) {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(addr = %self.addr, tx_id, error = %err, "commit failed");
                        return Err(StoreError::Commit { source: err });
                    }
                }
            }
            self.counters.committed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(addr = %self.addr, tx_id, "committed transaction");
            return Ok(());
        }

        if let Some(ds) = &self.datasource {
            let conn = ds.pool.get().context(PoolSnafu)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE distributed_tx SET status='COMMITTED', updated_at=?2 WHERE tx_id=?1",
                params![tx_id, now],
            )
            .context(AuditSnafu)?;
            tracing::debug!(addr = %self.addr, tx_id, "idempotent commit replay");
        }

        Ok(())
    }

    /// Abort: roll the open database transaction back and leave an `ABORTED`
    /// audit row.
    ///
    /// With no open transaction but a datasource attached, any existing audit
    /// row is flipped to `ABORTED`. Already-finalised errors are swallowed.
    pub fn abort(&self, tx_id: &str) -> Result<(), StoreError> {
        let mut pending = self.pending.lock();

        if let Some(ptx) = pending.remove(tx_id) {
            if let Some(conn) = &ptx.conn {
                if let Err(err) = conn.execute_batch("ROLLBACK") {
                    if !is_already_finished(&err) {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(addr = %self.addr, tx_id, error = %err, "abort failed");
                        return Err(StoreError::Rollback { source: err });
                    }
                }
                // The rollback also erased the PREPARED audit row; record the
                // outcome durably so operators can see the transaction was
                // resolved.
                let payload_json =
                    serde_json::to_string(&ptx.payload).context(SerializeSnafu)?;
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT OR REPLACE INTO distributed_tx (tx_id, payload, status, created_at, updated_at)
                     VALUES (?1, ?2, 'ABORTED', ?3, ?3)",
                    params![tx_id, payload_json, now],
                )
                .context(AuditSnafu)?;
            }
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
            tracing::info!(addr = %self.addr, tx_id, "aborted transaction");
            return Ok(());
        }

        if let Some(ds) = &self.datasource {
            let conn = ds.pool.get().context(PoolSnafu)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE distributed_tx SET status='ABORTED', updated_at=?2 WHERE tx_id=?1",
                params![tx_id, now],
            )
            .context(AuditSnafu)?;
            tracing::debug!(addr = %self.addr, tx_id, "idempotent abort replay");
        }

        Ok(())
    }

    /// Durable status of a transaction, if the audit table has a row for it.
    pub fn transaction_status(&self, tx_id: &str) -> Result<Option<TxStatus>, StoreError> {
        let Some(ds) = &self.datasource else {
            return Ok(None);
        };

        let conn = ds.pool.get().context(PoolSnafu)?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM distributed_tx WHERE tx_id=?1",
                params![tx_id],
                |row| row.get(0),
            )
            .optional()
            .context(QuerySnafu)?;

        Ok(status.as_deref().and_then(TxStatus::parse))
    }

    /// Page through the audit table, newest first, optionally filtered by
    /// status.
    ///
    /// Returns the page of records and the total row count for the filter.
    pub fn list_transactions(
        &self,
        page: u32,
        limit: u32,
        status: Option<&str>,
    ) -> Result<(Vec<TransactionRecord>, u64), StoreError> {
        let Some(ds) = &self.datasource else {
            return Ok((Vec::new(), 0));
        };

        let page = page.max(1);
        let limit = if limit == 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            limit.min(MAX_PAGE_LIMIT)
        };
        let offset = (page - 1) as i64 * limit as i64;
        let status = status
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty());

        let conn = ds.pool.get().context(PoolSnafu)?;

        let total: i64 = match &status {
            Some(status) => conn
                .query_row(
                    "SELECT COUNT(*) FROM distributed_tx WHERE status=?1",
                    params![status],
                    |row| row.get(0),
                )
                .context(QuerySnafu)?,
            None => conn
                .query_row("SELECT COUNT(*) FROM distributed_tx", [], |row| row.get(0))
                .context(QuerySnafu)?,
        };

        let mut records = Vec::new();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<TransactionRecord> {
            let payload_text: String = row.get(1)?;
            Ok(TransactionRecord {
                tx_id: row.get(0)?,
                payload: serde_json::from_str(&payload_text)
                    .unwrap_or(Value::String(payload_text)),
                status: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        };

        match &status {
            Some(status) => {
                let mut stmt = conn
                    .prepare(
                        "SELECT tx_id, payload, status, created_at, updated_at
                         FROM distributed_tx WHERE status=?1
                         ORDER BY updated_at DESC, tx_id LIMIT ?2 OFFSET ?3",
                    )
                    .context(QuerySnafu)?;
                let rows = stmt
                    .query_map(params![status, limit as i64, offset], map_row)
                    .context(QuerySnafu)?;
                for row in rows {
                    records.push(row.context(QuerySnafu)?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(
                        "SELECT tx_id, payload, status, created_at, updated_at
                         FROM distributed_tx
                         ORDER BY updated_at DESC, tx_id LIMIT ?1 OFFSET ?2",
                    )
                    .context(QuerySnafu)?;
                let rows = stmt
                    .query_map(params![limit as i64, offset], map_row)
                    .context(QuerySnafu)?;
                for row in rows {
                    records.push(row.context(QuerySnafu)?);
                }
            }
        }

        Ok((records, total as u64))
    }
}

/// Create the audit table if missing.
///
/// `CREATE TABLE IF NOT EXISTS` tolerates a concurrent creator winning the
/// race.
fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(AUDIT_DDL, []).context(ExecuteSnafu)?;
    Ok(())
}

/// True when a COMMIT/ROLLBACK failed only because the transaction was
/// already finalised. Those errors are swallowed to keep commit and abort
/// idempotent across retries and replays.
fn is_already_finished(err: &rusqlite::Error) -> bool {
    err.to_string().contains("no transaction is active")
}
