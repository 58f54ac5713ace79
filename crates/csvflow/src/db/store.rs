//! Transactional batch writes.

use std::path::Path;

use rusqlite::Connection;

use super::{configure_connection, user_repo, DatabaseError, StoreError};
use crate::batch::Batch;

/// The write capability the worker pool depends on.
///
/// Each worker owns one store for its whole life. A write cycle is
/// `begin_transaction`, `bulk_insert`, then `commit`, or `rollback` on any
/// failure along the way.
pub trait BatchStore: Send {
    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    /// Inserts every record of `batch`, returning how many rows were written.
    fn bulk_insert(&mut self, batch: &Batch) -> Result<usize, StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;

    /// Discards the open transaction. A no-op when none is open.
    fn rollback(&mut self) -> Result<(), StoreError>;
}

/// [`BatchStore`] over one dedicated SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Opens a new connection to an already-migrated database file.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            in_transaction: false,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl BatchStore for SqliteStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::TransactionInProgress);
        }
        // IMMEDIATE takes the write lock up front, so a busy database fails
        // here rather than halfway through the inserts.
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn bulk_insert(&mut self, batch: &Batch) -> Result<usize, StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        Ok(user_repo::insert_records(
            &self.conn,
            &batch.filename,
            &batch.records,
        )?)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.in_transaction {
            log::warn!("Store dropped with an open transaction, rolling back");
            if let Err(e) = self.rollback() {
                log::error!("Rollback on drop failed: {}", e);
            }
        }
    }
}
