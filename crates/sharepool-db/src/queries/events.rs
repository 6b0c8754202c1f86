//! Append-only ledger event log.

use rusqlite::Connection;
use sharepool_types::events::LedgerEvent;
use sharepool_types::PoolKey;

use crate::{DbError, Result};

/// A stored event with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub seq: u64,
    pub event: LedgerEvent,
}

/// Append an event.
pub fn append(conn: &Connection, event: &LedgerEvent) -> Result<()> {
    let payload =
        serde_json::to_string(event).map_err(|e| DbError::Serialization(e.to_string()))?;
    let pool = event.pool();
    conn.execute(
        "INSERT INTO ledger_events (client, pool_id, event_type, payload) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            pool.client.as_bytes().as_slice(),
            pool.pool_id as i64,
            event.event_type().as_str(),
            payload,
        ],
    )?;
    Ok(())
}

/// List a pool's events after sequence number `after`, oldest first.
pub fn list_for_pool(conn: &Connection, pool: &PoolKey, after: u64, limit: u32) -> Result<Vec<EventRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, payload FROM ledger_events
         WHERE client = ?1 AND pool_id = ?2 AND seq > ?3
         ORDER BY seq LIMIT ?4",
    )?;
    let raw = stmt
        .query_map(
            rusqlite::params![
                pool.client.as_bytes().as_slice(),
                pool.pool_id as i64,
                after as i64,
                limit
            ],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(seq, payload)| {
            let event = serde_json::from_str(&payload)
                .map_err(|e| DbError::Serialization(e.to_string()))?;
            Ok(EventRow { seq, event })
        })
        .collect()
}

/// Total number of stored events.
pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM ledger_events", [], |row| row.get(0))?;
    Ok(n as u64)
}
