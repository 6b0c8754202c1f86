//! Checkpoint log rows.
//!
//! Each checkpoint is one `checkpoints` row plus one `checkpoint_balances`
//! row per asset that has ever accrued in the pool up to that index.

use std::collections::BTreeMap;
use std::ops::Range;

use rusqlite::{Connection, OptionalExtension};
use sharepool_types::{Address, Amount, AssetId};

use crate::{amount_from_blob, amount_to_blob, asset_from_blob, DbError, Result};

/// A raw checkpoint with its per-asset cumulative balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRow {
    pub index: u64,
    pub total_bps: u16,
    pub balances: BTreeMap<AssetId, Amount>,
}

/// Append a checkpoint and its balances.
pub fn insert(
    conn: &Connection,
    client: &Address,
    pool_id: u64,
    index: u64,
    total_bps: u16,
    balances: &BTreeMap<AssetId, Amount>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO checkpoints (client, pool_id, idx, total_bps) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![client.as_bytes().as_slice(), pool_id as i64, index as i64, total_bps],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!("checkpoint {index} already exists"))
        }
        other => DbError::Sqlite(other),
    })?;

    let mut stmt = conn.prepare(
        "INSERT INTO checkpoint_balances (client, pool_id, idx, asset, cumulative)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (asset, cumulative) in balances {
        stmt.execute(rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            index as i64,
            asset.as_bytes().as_slice(),
            amount_to_blob(*cumulative).as_slice(),
        ])?;
    }
    Ok(())
}

/// Load the checkpoints whose index falls in `range`, in index order.
pub fn range(
    conn: &Connection,
    client: &Address,
    pool_id: u64,
    range: Range<u64>,
) -> Result<Vec<CheckpointRow>> {
    if range.is_empty() {
        return Ok(Vec::new());
    }
    let start = range.start as i64;
    let end = i64::try_from(range.end).unwrap_or(i64::MAX);

    let mut stmt = conn.prepare(
        "SELECT idx, total_bps FROM checkpoints
         WHERE client = ?1 AND pool_id = ?2 AND idx >= ?3 AND idx < ?4
         ORDER BY idx",
    )?;
    let mut rows: Vec<CheckpointRow> = stmt
        .query_map(
            rusqlite::params![client.as_bytes().as_slice(), pool_id as i64, start, end],
            |row| {
                Ok(CheckpointRow {
                    index: row.get::<_, i64>(0)? as u64,
                    total_bps: row.get(1)?,
                    balances: BTreeMap::new(),
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT idx, asset, cumulative FROM checkpoint_balances
         WHERE client = ?1 AND pool_id = ?2 AND idx >= ?3 AND idx < ?4
         ORDER BY idx",
    )?;
    let balances = stmt
        .query_map(
            rusqlite::params![client.as_bytes().as_slice(), pool_id as i64, start, end],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // Both result sets are ordered by idx and rows are contiguous.
    let first = rows.first().map_or(0, |r| r.index);
    for (index, asset, cumulative) in balances {
        let slot = index
            .checked_sub(first)
            .and_then(|offset| rows.get_mut(offset as usize))
            .filter(|row| row.index == index)
            .ok_or_else(|| DbError::NotFound(format!("checkpoint {index} for balance row")))?;
        slot.balances
            .insert(asset_from_blob(&asset)?, amount_from_blob(&cumulative)?);
    }

    Ok(rows)
}

/// Load a single checkpoint.
pub fn get(conn: &Connection, client: &Address, pool_id: u64, index: u64) -> Result<Option<CheckpointRow>> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM checkpoints WHERE client = ?1 AND pool_id = ?2 AND idx = ?3",
            rusqlite::params![client.as_bytes().as_slice(), pool_id as i64, index as i64],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }
    let end = index.saturating_add(1);
    Ok(range(conn, client, pool_id, index..end)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn client() -> Address {
        Address::from_bytes([1; 32])
    }

    fn seed(conn: &Connection) {
        crate::queries::pools::upsert(conn, &client(), 1, 1000, 0, 100).expect("pool");
    }

    #[test]
    fn test_insert_and_range() {
        let conn = test_db();
        seed(&conn);
        let a = AssetId::from_bytes([0xA; 32]);
        let b = AssetId::from_bytes([0xB; 32]);

        insert(&conn, &client(), 1, 0, 1000, &BTreeMap::from([(a, 10)])).expect("cp0");
        insert(&conn, &client(), 1, 1, 1500, &BTreeMap::from([(a, 10), (b, 7)])).expect("cp1");
        insert(&conn, &client(), 1, 2, 1500, &BTreeMap::from([(a, 25), (b, 7)])).expect("cp2");

        let rows = range(&conn, &client(), 1, 1..3).expect("range");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].total_bps, 1500);
        assert_eq!(rows[0].balances.get(&b), Some(&7));
        assert_eq!(rows[1].balances.get(&a), Some(&25));

        let all = range(&conn, &client(), 1, 0..u64::MAX).expect("range");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let conn = test_db();
        seed(&conn);
        insert(&conn, &client(), 1, 0, 1000, &BTreeMap::new()).expect("first");
        let result = insert(&conn, &client(), 1, 0, 1000, &BTreeMap::new());
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_get_single() {
        let conn = test_db();
        seed(&conn);
        let a = AssetId::NATIVE;
        insert(&conn, &client(), 1, 0, 1000, &BTreeMap::from([(a, Amount::MAX)])).expect("cp0");

        let row = get(&conn, &client(), 1, 0).expect("get").expect("exists");
        assert_eq!(row.balances.get(&a), Some(&Amount::MAX));
        assert!(get(&conn, &client(), 1, 1).expect("get").is_none());
    }

    #[test]
    fn test_empty_range() {
        let conn = test_db();
        let rows = range(&conn, &client(), 1, 5..5).expect("range");
        assert!(rows.is_empty());
    }
}
