//! Inserts and paginated reads for the `users` table.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{Database, DatabaseError};
use crate::decode::Record;

/// Largest page size accepted by [`list_page`].
pub const MAX_PAGE_SIZE: u64 = 100;

/// A persisted user row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            age: row.get("age")?,
            email: row.get("email")?,
            file_name: row.get("file_name")?,
        })
    }
}

/// One page of users plus the paging metadata clients need.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<UserRow>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
    pub next_page: bool,
}

/// Inserts records on `conn` inside whatever transaction the caller holds.
pub fn insert_records(
    conn: &Connection,
    file_name: &str,
    records: &[Record],
) -> Result<usize, rusqlite::Error> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO users (first_name, last_name, age, email, file_name)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for record in records {
        stmt.execute(params![
            record.first_name,
            record.last_name,
            record.age,
            record.email,
            file_name,
        ])?;
    }
    Ok(records.len())
}

/// Finds a user by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM users WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], UserRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Total number of users.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
}

/// Number of users imported from `file_name`.
pub fn count_by_file(db: &Database, file_name: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM users WHERE file_name = ?1",
            params![file_name],
            |r| r.get(0),
        )?)
    })
}

/// Returns page `page` (1-based) of users ordered by id, `limit` per page.
pub fn list_page(db: &Database, page: u64, limit: u64) -> Result<UserPage, DatabaseError> {
    if page < 1 {
        return Err(DatabaseError::InvalidQuery(
            "page must be >= 1".to_string(),
        ));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(DatabaseError::InvalidQuery(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let offset = (page - 1)
        .checked_mul(limit)
        .and_then(|offset| i64::try_from(offset).ok())
        .ok_or_else(|| DatabaseError::InvalidQuery(format!("page {} is out of range", page)))?;

    db.with_conn(|conn| {
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;

        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY id LIMIT ?1 OFFSET ?2")?;
        let users = stmt
            .query_map(params![limit as i64, offset], UserRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let total_pages = total.div_ceil(limit);
        Ok(UserPage {
            users,
            page,
            limit,
            total,
            total_pages,
            next_page: page < total_pages,
        })
    })
}
