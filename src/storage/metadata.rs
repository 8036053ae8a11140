//! SQLite Metadata Store
//!
//! Durable store for statement metadata, receipt bookkeeping, checkpoint
//! history and the authoritative tree size. Uses connection pooling via
//! r2d2 for concurrent reads; the single append writer funnels all size
//! advances through one transaction.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use std::path::Path;

use super::object::{StorageError, StorageResult};
use crate::types::{ReceiptRecord, StatementRecord, TreeStateRow};

/// A single atomic advance of the tree: the new size, its root and signed
/// checkpoint, and (for registrations) the statement row committed with it.
#[derive(Debug, Clone)]
pub struct AppendCommit {
    pub new_size: u64,
    pub root_hash: String,
    pub checkpoint: String,
    pub statement: Option<StatementRecord>,
}

/// Metadata store interface
///
/// Implementations:
/// - `SqliteMetadataStore` - production storage with SQLite
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Authoritative current tree size
    async fn current_tree_size(&self) -> StorageResult<u64>;

    /// Atomically advance the tree size by one, recording checkpoint
    /// history and the per-entry statement row in the same transaction.
    async fn commit_append(&self, commit: AppendCommit) -> StorageResult<()>;

    /// Look up a statement by its entry id
    async fn statement_by_id(&self, entry_id: u64) -> StorageResult<Option<StatementRecord>>;

    /// Look up a statement by its hash (duplicate detection)
    async fn statement_by_hash(&self, statement_hash: &str)
        -> StorageResult<Option<StatementRecord>>;

    /// Record that a receipt was issued for an entry
    async fn insert_receipt(&self, receipt: &ReceiptRecord) -> StorageResult<()>;

    /// Fetch receipt bookkeeping for an entry
    async fn receipt(&self, entry_id: u64) -> StorageResult<Option<ReceiptRecord>>;

    /// Checkpoint history row at an exact size
    async fn tree_state_at(&self, tree_size: u64) -> StorageResult<Option<TreeStateRow>>;

    /// Latest checkpoint history row
    async fn latest_tree_state(&self) -> StorageResult<Option<TreeStateRow>>;

    /// Record the service public key by its thumbprint
    async fn record_service_key(&self, kid: &str, public_jwk: &str) -> StorageResult<()>;

    /// Fetch a recorded service key JWK by thumbprint
    async fn service_key(&self, kid: &str) -> StorageResult<Option<String>>;
}

/// SQLite-backed metadata store with connection pooling
pub struct SqliteMetadataStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteMetadataStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P, enable_wal: bool) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        if enable_wal {
            let conn = store.conn()?;
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS statements (
                entry_id INTEGER PRIMARY KEY,
                statement_hash TEXT NOT NULL UNIQUE,
                statement BLOB NOT NULL,
                iss TEXT,
                sub TEXT,
                cty TEXT,
                typ TEXT,
                payload_hash_alg INTEGER,
                payload_hash TEXT,
                tree_size INTEGER NOT NULL,
                entry_tile_key TEXT NOT NULL,
                entry_tile_offset INTEGER NOT NULL,
                registered_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS receipts (
                entry_id INTEGER PRIMARY KEY REFERENCES statements(entry_id),
                tree_size INTEGER NOT NULL,
                issued_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tree_state (
                tree_size INTEGER PRIMARY KEY,
                root_hash TEXT NOT NULL,
                checkpoint TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS current_tree_size (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                tree_size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS service_keys (
                kid TEXT PRIMARY KEY,
                public_jwk TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO current_tree_size (id, tree_size) VALUES (0, 0);

            CREATE INDEX IF NOT EXISTS idx_statements_iss ON statements(iss);
            CREATE INDEX IF NOT EXISTS idx_statements_registered_at ON statements(registered_at);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_statement(row: &rusqlite::Row) -> rusqlite::Result<StatementRecord> {
        Ok(StatementRecord {
            entry_id: row.get::<_, i64>("entry_id")? as u64,
            statement_hash: row.get("statement_hash")?,
            statement: row.get("statement")?,
            iss: row.get("iss")?,
            sub: row.get("sub")?,
            cty: row.get("cty")?,
            typ: row.get("typ")?,
            payload_hash_alg: row.get("payload_hash_alg")?,
            payload_hash: row.get("payload_hash")?,
            tree_size: row.get::<_, i64>("tree_size")? as u64,
            entry_tile_key: row.get("entry_tile_key")?,
            entry_tile_offset: row.get::<_, i64>("entry_tile_offset")? as u32,
            registered_at: row.get("registered_at")?,
        })
    }

    // Synchronous helpers for the trait implementation

    fn current_tree_size_sync(&self) -> Result<u64, StorageError> {
        let conn = self.conn()?;
        let size: i64 = conn
            .query_row(
                "SELECT tree_size FROM current_tree_size WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(size as u64)
    }

    fn commit_append_sync(&self, commit: AppendCommit) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let current: i64 = tx
            .query_row(
                "SELECT tree_size FROM current_tree_size WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if commit.new_size != current as u64 + 1 {
            return Err(StorageError::InvalidData(format!(
                "tree size advance {} does not follow current size {}",
                commit.new_size, current
            )));
        }

        tx.execute(
            "UPDATE current_tree_size SET tree_size = ?1 WHERE id = 0",
            params![commit.new_size as i64],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO tree_state (tree_size, root_hash, checkpoint, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                commit.new_size as i64,
                commit.root_hash,
                commit.checkpoint,
                chrono::Utc::now().timestamp_millis(),
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        if let Some(record) = &commit.statement {
            tx.execute(
                r#"
                INSERT INTO statements (
                    entry_id, statement_hash, statement, iss, sub, cty, typ,
                    payload_hash_alg, payload_hash, tree_size,
                    entry_tile_key, entry_tile_offset, registered_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
                params![
                    record.entry_id as i64,
                    record.statement_hash,
                    record.statement,
                    record.iss,
                    record.sub,
                    record.cty,
                    record.typ,
                    record.payload_hash_alg,
                    record.payload_hash,
                    record.tree_size as i64,
                    record.entry_tile_key,
                    record.entry_tile_offset as i64,
                    record.registered_at,
                ],
            )
            .map_err(|e| {
                if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                    if err.extended_code == 1555 || err.extended_code == 2067 {
                        return StorageError::Duplicate(record.statement_hash.clone());
                    }
                }
                StorageError::Database(e.to_string())
            })?;
        }

        tx.commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn statement_by_id_sync(&self, entry_id: u64) -> Result<Option<StatementRecord>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM statements WHERE entry_id = ?1",
            params![entry_id as i64],
            |row| Self::row_to_statement(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn statement_by_hash_sync(
        &self,
        statement_hash: &str,
    ) -> Result<Option<StatementRecord>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM statements WHERE statement_hash = ?1",
            params![statement_hash],
            |row| Self::row_to_statement(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn insert_receipt_sync(&self, receipt: &ReceiptRecord) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO receipts (entry_id, tree_size, issued_at)
             VALUES (?1, ?2, ?3)",
            params![
                receipt.entry_id as i64,
                receipt.tree_size as i64,
                receipt.issued_at,
            ],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn receipt_sync(&self, entry_id: u64) -> Result<Option<ReceiptRecord>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT entry_id, tree_size, issued_at FROM receipts WHERE entry_id = ?1",
            params![entry_id as i64],
            |row| {
                Ok(ReceiptRecord {
                    entry_id: row.get::<_, i64>(0)? as u64,
                    tree_size: row.get::<_, i64>(1)? as u64,
                    issued_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn row_to_tree_state(row: &rusqlite::Row) -> rusqlite::Result<TreeStateRow> {
        Ok(TreeStateRow {
            tree_size: row.get::<_, i64>("tree_size")? as u64,
            root_hash: row.get("root_hash")?,
            checkpoint: row.get("checkpoint")?,
            created_at: row.get("created_at")?,
        })
    }

    fn tree_state_at_sync(&self, tree_size: u64) -> Result<Option<TreeStateRow>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM tree_state WHERE tree_size = ?1",
            params![tree_size as i64],
            |row| Self::row_to_tree_state(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn latest_tree_state_sync(&self) -> Result<Option<TreeStateRow>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM tree_state ORDER BY tree_size DESC LIMIT 1",
            [],
            |row| Self::row_to_tree_state(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn record_service_key_sync(&self, kid: &str, public_jwk: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO service_keys (kid, public_jwk, created_at)
             VALUES (?1, ?2, ?3)",
            params![kid, public_jwk, chrono::Utc::now().timestamp_millis()],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    fn service_key_sync(&self, kid: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT public_jwk FROM service_keys WHERE kid = ?1",
            params![kid],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn current_tree_size(&self) -> StorageResult<u64> {
        self.current_tree_size_sync()
    }

    async fn commit_append(&self, commit: AppendCommit) -> StorageResult<()> {
        self.commit_append_sync(commit)
    }

    async fn statement_by_id(&self, entry_id: u64) -> StorageResult<Option<StatementRecord>> {
        self.statement_by_id_sync(entry_id)
    }

    async fn statement_by_hash(
        &self,
        statement_hash: &str,
    ) -> StorageResult<Option<StatementRecord>> {
        self.statement_by_hash_sync(statement_hash)
    }

    async fn insert_receipt(&self, receipt: &ReceiptRecord) -> StorageResult<()> {
        self.insert_receipt_sync(receipt)
    }

    async fn receipt(&self, entry_id: u64) -> StorageResult<Option<ReceiptRecord>> {
        self.receipt_sync(entry_id)
    }

    async fn tree_state_at(&self, tree_size: u64) -> StorageResult<Option<TreeStateRow>> {
        self.tree_state_at_sync(tree_size)
    }

    async fn latest_tree_state(&self) -> StorageResult<Option<TreeStateRow>> {
        self.latest_tree_state_sync()
    }

    async fn record_service_key(&self, kid: &str, public_jwk: &str) -> StorageResult<()> {
        self.record_service_key_sync(kid, public_jwk)
    }

    async fn service_key(&self, kid: &str) -> StorageResult<Option<String>> {
        self.service_key_sync(kid)
    }
}
