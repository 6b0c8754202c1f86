//! # sharepool-db
//!
//! SQLite persistence for the sharepool ledger.
//!
//! ## Schema
//!
//! - WAL mode mandatory
//! - Foreign keys enforced, deferred to commit
//! - All timestamps are Unix epoch seconds (u64 stored as INTEGER)
//! - Amounts are u128 stored as 16-byte big-endian BLOBs
//! - Schema version stored in `PRAGMA user_version`

pub mod migrations;
pub mod queries;
pub mod schema;

use rusqlite::Connection;
use sharepool_types::{Address, Amount, AssetId};
use std::path::Path;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the ledger database at the given path.
///
/// Configures WAL mode, foreign keys, and runs any pending migrations.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;",
    )?;
    Ok(())
}

/// Open a write transaction.
pub fn begin(conn: &Connection) -> Result<()> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    Ok(())
}

/// Commit the open transaction. Deferred foreign keys are checked here.
pub fn commit(conn: &Connection) -> Result<()> {
    conn.execute_batch("COMMIT").map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(msg.unwrap_or_else(|| err.to_string()))
        }
        other => DbError::Sqlite(other),
    })
}

/// Roll back the open transaction.
pub fn rollback(conn: &Connection) -> Result<()> {
    conn.execute_batch("ROLLBACK")?;
    Ok(())
}

/// Encode an amount for storage.
pub fn amount_to_blob(amount: Amount) -> [u8; 16] {
    amount.to_be_bytes()
}

/// Decode a stored amount.
pub fn amount_from_blob(blob: &[u8]) -> Result<Amount> {
    let bytes: [u8; 16] = blob.try_into().map_err(|_| {
        DbError::Serialization(format!("amount blob of {} bytes", blob.len()))
    })?;
    Ok(Amount::from_be_bytes(bytes))
}

pub(crate) fn id_from_blob(blob: &[u8]) -> Result<[u8; 32]> {
    blob.try_into()
        .map_err(|_| DbError::Serialization(format!("identifier blob of {} bytes", blob.len())))
}

pub(crate) fn address_from_blob(blob: &[u8]) -> Result<Address> {
    id_from_blob(blob).map(Address::from_bytes)
}

pub(crate) fn asset_from_blob(blob: &[u8]) -> Result<AssetId> {
    id_from_blob(blob).map(AssetId::from_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_amount_blob_roundtrip_extremes() {
        for amount in [0, 1, u64::MAX as Amount + 1, Amount::MAX] {
            let blob = amount_to_blob(amount);
            assert_eq!(amount_from_blob(&blob).expect("decode"), amount);
        }
        assert!(amount_from_blob(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_transaction_rollback() {
        let conn = open_memory().expect("open");
        begin(&conn).expect("begin");
        queries::pools::upsert(&conn, &Address::from_bytes([1; 32]), 1, 0, 0, 100)
            .expect("insert");
        rollback(&conn).expect("rollback");
        assert!(queries::pools::get(&conn, &Address::from_bytes([1; 32]), 1)
            .expect("get")
            .is_none());
    }
}
