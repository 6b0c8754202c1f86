//! Pool rows.

use rusqlite::{Connection, OptionalExtension};
use sharepool_types::{Address, PoolKey};

use crate::{address_from_blob, Result};

/// A raw pool row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRow {
    pub total_bps: u16,
    pub checkpoint_count: u64,
    pub created_at: u64,
}

/// Get a pool by key.
pub fn get(conn: &Connection, client: &Address, pool_id: u64) -> Result<Option<PoolRow>> {
    let row = conn
        .query_row(
            "SELECT total_bps, checkpoint_count, created_at
             FROM pools WHERE client = ?1 AND pool_id = ?2",
            rusqlite::params![client.as_bytes().as_slice(), pool_id as i64],
            |row| {
                Ok(PoolRow {
                    total_bps: row.get(0)?,
                    checkpoint_count: row.get::<_, i64>(1)? as u64,
                    created_at: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Insert or update a pool.
pub fn upsert(
    conn: &Connection,
    client: &Address,
    pool_id: u64,
    total_bps: u16,
    checkpoint_count: u64,
    created_at: u64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO pools (client, pool_id, total_bps, checkpoint_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (client, pool_id) DO UPDATE SET
             total_bps = excluded.total_bps,
             checkpoint_count = excluded.checkpoint_count",
        rusqlite::params![
            client.as_bytes().as_slice(),
            pool_id as i64,
            total_bps,
            checkpoint_count as i64,
            created_at as i64,
        ],
    )?;
    Ok(())
}

/// List every pool key, ordered.
pub fn list(conn: &Connection) -> Result<Vec<PoolKey>> {
    let mut stmt = conn.prepare("SELECT client, pool_id FROM pools ORDER BY client, pool_id")?;
    let raw = stmt
        .query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(client, pool_id)| Ok(PoolKey::new(address_from_blob(&client)?, pool_id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_missing_pool() {
        let conn = test_db();
        assert!(get(&conn, &Address::from_bytes([1; 32]), 1)
            .expect("get")
            .is_none());
    }

    #[test]
    fn test_upsert_keeps_created_at() {
        let conn = test_db();
        let client = Address::from_bytes([1; 32]);
        upsert(&conn, &client, 1, 1000, 0, 100).expect("insert");
        upsert(&conn, &client, 1, 2500, 3, 999).expect("update");

        let row = get(&conn, &client, 1).expect("get").expect("exists");
        assert_eq!(
            row,
            PoolRow {
                total_bps: 2500,
                checkpoint_count: 3,
                created_at: 100,
            }
        );
    }

    #[test]
    fn test_bps_check_constraint() {
        let conn = test_db();
        let result = upsert(&conn, &Address::from_bytes([1; 32]), 1, 10_001, 0, 100);
        assert!(result.is_err());
    }

    #[test]
    fn test_list_ordered() {
        let conn = test_db();
        let a = Address::from_bytes([1; 32]);
        let b = Address::from_bytes([2; 32]);
        upsert(&conn, &b, 1, 0, 0, 1).expect("insert");
        upsert(&conn, &a, 7, 0, 0, 1).expect("insert");
        upsert(&conn, &a, 2, 0, 0, 1).expect("insert");

        let keys = list(&conn).expect("list");
        assert_eq!(
            keys,
            vec![PoolKey::new(a, 2), PoolKey::new(a, 7), PoolKey::new(b, 1)]
        );
    }
}
