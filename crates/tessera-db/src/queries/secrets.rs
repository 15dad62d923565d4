//! Maker-side secret storage.
//!
//! A maker keeps its `N + 1` secrets here between order creation and
//! disclosure. Disclosure is recorded per index so a restarted maker never
//! reveals a secret twice by accident.

use rusqlite::Connection;
use tessera_crypto::secret::Secret;
use tessera_types::OrderId;

use crate::{blob32, constraint, Result};

/// Store all secrets of an order; index `i` is stored for `secrets[i - 1]`.
pub fn store(conn: &Connection, order_id: &OrderId, secrets: &[Secret]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO maker_secrets (order_id, secret_index, secret) VALUES (?1, ?2, ?3)",
        )?;
        for (position, secret) in secrets.iter().enumerate() {
            stmt.execute(rusqlite::params![
                order_id.as_bytes().as_slice(),
                (position + 1) as i64,
                secret.as_bytes().as_slice(),
            ])
            .map_err(|e| constraint(e, &format!("secrets for order {order_id}")))?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Load all secrets of an order in index order.
pub fn load(conn: &Connection, order_id: &OrderId) -> Result<Vec<Secret>> {
    let mut stmt = conn.prepare(
        "SELECT secret FROM maker_secrets WHERE order_id = ?1 ORDER BY secret_index",
    )?;
    let blobs = stmt
        .query_map([order_id.as_bytes().as_slice()], |row| row.get::<_, Vec<u8>>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    blobs
        .into_iter()
        .map(|blob| blob32(blob, "secret").map(Secret::from_bytes))
        .collect()
}

/// Mark `indices` as disclosed at `at`. Already-disclosed indices keep their
/// first timestamp.
pub fn mark_disclosed(conn: &Connection, order_id: &OrderId, indices: &[u32], at: u64) -> Result<()> {
    let mut stmt = conn.prepare(
        "UPDATE maker_secrets SET disclosed_at = ?1
         WHERE order_id = ?2 AND secret_index = ?3 AND disclosed_at IS NULL",
    )?;
    for index in indices {
        stmt.execute(rusqlite::params![at as i64, order_id.as_bytes().as_slice(), index])?;
    }
    Ok(())
}

/// Indices already disclosed, ascending.
pub fn disclosed(conn: &Connection, order_id: &OrderId) -> Result<Vec<u32>> {
    let mut stmt = conn.prepare(
        "SELECT secret_index FROM maker_secrets
         WHERE order_id = ?1 AND disclosed_at IS NOT NULL ORDER BY secret_index",
    )?;
    let rows = stmt
        .query_map([order_id.as_bytes().as_slice()], |row| row.get::<_, u32>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Remove every secret of an order.
pub fn delete(conn: &Connection, order_id: &OrderId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM maker_secrets WHERE order_id = ?1",
        [order_id.as_bytes().as_slice()],
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn secrets() -> Vec<Secret> {
        (1..=4u8).map(|i| Secret::from_bytes([i; 32])).collect()
    }

    #[test]
    fn test_store_and_load_in_order() {
        let conn = test_db();
        let order = OrderId::new([1; 32]);
        store(&conn, &order, &secrets()).expect("store");
        assert_eq!(load(&conn, &order).expect("load"), secrets());
        assert!(load(&conn, &OrderId::new([2; 32])).expect("load").is_empty());
    }

    #[test]
    fn test_store_twice_rejected_atomically() {
        let conn = test_db();
        let order = OrderId::new([1; 32]);
        store(&conn, &order, &secrets()[..2]).expect("store");
        assert!(matches!(
            store(&conn, &order, &secrets()),
            Err(DbError::Constraint(_))
        ));
        assert_eq!(load(&conn, &order).expect("load").len(), 2);
    }

    #[test]
    fn test_disclosure_tracking() {
        let conn = test_db();
        let order = OrderId::new([1; 32]);
        store(&conn, &order, &secrets()).expect("store");
        mark_disclosed(&conn, &order, &[1, 2], 50).expect("mark");
        mark_disclosed(&conn, &order, &[2, 4], 60).expect("mark");
        assert_eq!(disclosed(&conn, &order).expect("disclosed"), vec![1, 2, 4]);

        assert_eq!(delete(&conn, &order).expect("delete"), 4);
        assert!(disclosed(&conn, &order).expect("disclosed").is_empty());
    }
}
