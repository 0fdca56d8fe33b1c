use std::ops::DerefMut;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Locking mode a transaction starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Takes locks lazily; used for reads.
    Deferred,
    /// Takes the write lock up front; used for read-modify-write.
    Immediate,
    /// Locks out readers too; used for schema creation.
    Exclusive,
}

impl From<TransactionMode> for TransactionBehavior {
    fn from(mode: TransactionMode) -> Self {
        match mode {
            TransactionMode::Deferred => TransactionBehavior::Deferred,
            TransactionMode::Immediate => TransactionBehavior::Immediate,
            TransactionMode::Exclusive => TransactionBehavior::Exclusive,
        }
    }
}

/// What the project storage needs from the relational engine: connections
/// and transactions in three modes.
pub trait Database: Send + Sync {
    type Connection<'a>: DerefMut<Target = Connection>
    where
        Self: 'a;

    fn connection(&self) -> Result<Self::Connection<'_>>;

    /// Whether the schema was already created before this handle was opened.
    fn is_initialized(&self) -> bool;

    /// Runs `f` inside a transaction and commits if it returns `Ok`.
    /// Dropping the transaction on the error path rolls it back.
    fn with_transaction<T, F>(&self, mode: TransactionMode, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let transaction = conn.transaction_with_behavior(mode.into())?;
        let value = f(&transaction)?;
        transaction.commit()?;
        Ok(value)
    }
}

/// Database file shared through a connection pool.
#[derive(Clone)]
pub struct PooledDatabase {
    pool: ConnectionPool,
    db_path: PathBuf,
    is_initialized: bool,
}

impl PooledDatabase {
    /// Create or open a database
    pub fn open(db_path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening database at: {}", db_path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let wal = config.wal;
        let manager = SqliteConnectionManager::file(&db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            if wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            Ok(())
        });

        let pool = Pool::builder().max_size(config.pool_size).build(manager)?;
        let is_initialized = has_schema(&*pool.get()?)?;

        debug!(
            "Database pool ready (size {}, initialized: {})",
            config.pool_size, is_initialized
        );

        Ok(Self {
            pool,
            db_path,
            is_initialized,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

/// True once the schema has been created; an existing file is not enough.
fn has_schema(conn: &Connection) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?)
}

impl Database for PooledDatabase {
    type Connection<'a> = r2d2::PooledConnection<SqliteConnectionManager>;

    fn connection(&self) -> Result<Self::Connection<'_>> {
        Ok(self.pool.get()?)
    }

    fn is_initialized(&self) -> bool {
        self.is_initialized
    }
}

/// A private in-memory database behind a single connection.
pub struct MemoryDatabase {
    conn: Mutex<Connection>,
}

impl MemoryDatabase {
    pub fn open() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Database for MemoryDatabase {
    type Connection<'a> = MutexGuard<'a, Connection>;

    fn connection(&self) -> Result<Self::Connection<'_>> {
        Ok(self.conn.lock())
    }

    fn is_initialized(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::schema::Initializer;
    use tempfile::tempdir;

    #[test]
    fn test_create_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.db");

        let db = PooledDatabase::open(&db_path, &DatabaseConfig::default()).unwrap();
        assert!(!db.is_initialized());
        Initializer::run(&db).unwrap();
        assert!(db_path.exists());

        let reopened = PooledDatabase::open(&db_path, &DatabaseConfig::default()).unwrap();
        assert!(reopened.is_initialized());
    }

    #[test]
    fn test_file_without_schema_is_not_initialized() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        // An earlier open created the file but never ran the schema setup
        drop(PooledDatabase::open(&db_path, &DatabaseConfig::default()).unwrap());
        assert!(db_path.exists());

        let reopened = PooledDatabase::open(&db_path, &DatabaseConfig::default()).unwrap();
        assert!(!reopened.is_initialized());

        Initializer::run(&reopened).unwrap();
        let tables: i64 = reopened
            .connection()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='types'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn test_pooled_connections_enforce_foreign_keys() {
        let dir = tempdir().unwrap();
        let db = PooledDatabase::open(dir.path().join("test.db"), &DatabaseConfig::default())
            .unwrap();

        let enabled: bool = db
            .connection()
            .unwrap()
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert!(enabled);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = MemoryDatabase::open().unwrap();
        db.connection()
            .unwrap()
            .execute_batch("CREATE TABLE t(x INTEGER)")
            .unwrap();

        db.with_transaction(TransactionMode::Immediate, |tx| {
            tx.execute("INSERT INTO t VALUES (1)", [])?;
            Ok(())
        })
        .unwrap();

        let count: i64 = db
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = MemoryDatabase::open().unwrap();
        db.connection()
            .unwrap()
            .execute_batch("CREATE TABLE t(x INTEGER)")
            .unwrap();

        let result: Result<()> = db.with_transaction(TransactionMode::Immediate, |tx| {
            tx.execute("INSERT INTO t VALUES (1)", [])?;
            Err(StorageError::InvalidSourcePath("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
