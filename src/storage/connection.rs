//! Database connection management with WAL mode support
//!
//! Single SQLite connection behind a mutex. The mutex plus immediate-mode
//! write transactions are what gives mutating operations their row-locking
//! guarantee: a read-modify-write running inside `with_transaction` holds the
//! write lock for its whole duration, so concurrent updates to one record
//! serialize instead of racing.

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;

use super::migrations::run_migrations;
use crate::error::Result;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database file path, or ":memory:" for an in-memory database
    pub db_path: String,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
        }
    }
}

/// Storage engine wrapping SQLite
pub struct Storage {
    config: StorageConfig,
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a database with the given configuration
    pub fn open(config: StorageConfig) -> Result<Self> {
        let conn = Self::create_connection(&config)?;
        run_migrations(&conn)?;

        Ok(Self {
            config,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::open(StorageConfig::in_memory())
    }

    fn create_connection(config: &StorageConfig) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.db_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(&config.db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open_with_flags(&config.db_path, flags)?
        };

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA cache_size=-64000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        Ok(conn)
    }

    /// Execute a read-only function with the connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a function inside an immediate-mode write transaction.
    ///
    /// The write lock is taken up front, before the closure's first read, so
    /// a read-modify-write sees no interleaved writers. Any error rolls the
    /// whole transaction back; no partial writes become visible.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Get database path
    pub fn db_path(&self) -> &str {
        &self.config.db_path
    }

    /// Checkpoint the WAL file
    pub fn checkpoint(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            conn: self.conn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let storage = Storage::open_in_memory().unwrap();
        assert_eq!(storage.db_path(), ":memory:");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let storage = Storage::open_in_memory().unwrap();

        let result: Result<()> = storage.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, organization_id, timezone, status, created_at)
                 VALUES ('user-1', 'user-1', 'org-1', 'UTC (UTC+00:00)', 'active', '2024-01-01T00:00:00Z')",
                [],
            )?;
            Err(crate::MirixError::Internal("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = storage
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_backed_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("mirix.db").to_string_lossy().to_string();

        {
            let storage = Storage::open(StorageConfig {
                db_path: db_path.clone(),
            })
            .unwrap();
            storage
                .with_transaction(|conn| {
                    conn.execute(
                        "INSERT INTO users (id, name, organization_id, timezone, status, created_at)
                         VALUES ('user-3', 'user-3', 'org-1', 'UTC (UTC+00:00)', 'active', '2024-01-01T00:00:00Z')",
                        [],
                    )?;
                    Ok(())
                })
                .unwrap();
            storage.checkpoint().unwrap();
        }

        let reopened = Storage::open(StorageConfig { db_path }).unwrap();
        let count: i64 = reopened
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_clone_shares_connection() {
        let storage = Storage::open_in_memory().unwrap();
        let clone = storage.clone();

        storage
            .with_transaction(|conn| {
                conn.execute(
                    "INSERT INTO users (id, name, organization_id, timezone, status, created_at)
                     VALUES ('user-2', 'user-2', 'org-1', 'UTC (UTC+00:00)', 'active', '2024-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let count: i64 = clone
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
