//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite). [`Database`] is a shared, mutex-guarded handle for
//! schema setup and read queries. Batch writes go through [`SqliteStore`],
//! one connection per worker, so transactions never interleave on a
//! connection. WAL mode plus a busy timeout lets those writers take turns.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod migrations;
pub mod store;
pub mod user_repo;

pub use error::{DatabaseError, StoreError};
pub use store::{BatchStore, SqliteStore};

/// How long a connection waits for another writer before giving up.
pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        configure_connection(&conn)?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// File backing this database; `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens `count` independent write connections to the same file, one per
    /// worker.
    pub fn open_stores(&self, count: usize) -> Result<Vec<SqliteStore>, DatabaseError> {
        let path = self.path.as_deref().ok_or_else(|| {
            DatabaseError::InvalidQuery(
                "in-memory databases cannot be shared across worker connections".to_string(),
            )
        })?;
        (0..count).map(|_| SqliteStore::open(path)).collect()
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// WAL journal and busy timeout, applied to every file-backed connection.
pub(crate) fn configure_connection(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal mode: {}", mode);
    Ok(())
}

/// Returns the canonical database path: `~/.csvflow/data/csvflow.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".csvflow").join("data").join("csvflow.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
        assert!(db.path().is_none());
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
    }

    #[test]
    fn test_open_stores_requires_file() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.open_stores(2),
            Err(DatabaseError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_open_stores_gives_one_connection_each() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        let stores = db.open_stores(3).unwrap();
        assert_eq!(stores.len(), 3);
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("csvflow.db"));
        assert!(path.to_string_lossy().contains(".csvflow"));
    }
}
