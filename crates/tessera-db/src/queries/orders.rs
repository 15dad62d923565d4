//! Order query functions.
//!
//! Each row keeps the full order as a JSON snapshot; `status` and the
//! timestamps are duplicated into columns for filtering.

use rusqlite::{Connection, OptionalExtension};
use tessera_types::order::{Order, OrderStatus};
use tessera_types::OrderId;

use crate::{DbError, Result};

/// Insert or replace the snapshot of `order`.
pub fn upsert(conn: &Connection, order: &Order) -> Result<()> {
    let snapshot = serde_json::to_string(order)?;
    conn.execute(
        "INSERT INTO orders (order_id, status, maker_public_key, source_chain,
                             destination_chain, snapshot, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(order_id) DO UPDATE SET
             status = excluded.status,
             snapshot = excluded.snapshot,
             updated_at = excluded.updated_at",
        rusqlite::params![
            order.order_id.as_bytes().as_slice(),
            order.status.as_str(),
            order.intent.maker_public_key.as_bytes().as_slice(),
            order.intent.source_chain.as_str(),
            order.intent.destination_chain.as_str(),
            snapshot,
            order.created_at as i64,
            order.updated_at as i64,
        ],
    )?;
    Ok(())
}

/// Load one order.
pub fn get(conn: &Connection, order_id: &OrderId) -> Result<Order> {
    let snapshot: Option<String> = conn
        .query_row(
            "SELECT snapshot FROM orders WHERE order_id = ?1",
            [order_id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    let snapshot = snapshot.ok_or_else(|| DbError::NotFound(format!("order {order_id}")))?;
    Ok(serde_json::from_str(&snapshot)?)
}

/// List orders, optionally by status, oldest first.
pub fn list(conn: &Connection, status: Option<OrderStatus>) -> Result<Vec<Order>> {
    let snapshots: Vec<String> = match status {
        Some(status) => {
            let mut stmt = conn.prepare(
                "SELECT snapshot FROM orders WHERE status = ?1 ORDER BY created_at, order_id",
            )?;
            let rows = stmt
                .query_map([status.as_str()], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt =
                conn.prepare("SELECT snapshot FROM orders ORDER BY created_at, order_id")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    snapshots
        .iter()
        .map(|s| serde_json::from_str(s).map_err(DbError::from))
        .collect()
}

/// Orders that are neither completed nor expired.
pub fn list_active(conn: &Connection) -> Result<Vec<Order>> {
    let mut active = list(conn, Some(OrderStatus::Open))?;
    active.extend(list(conn, Some(OrderStatus::Claimed))?);
    active.sort_by_key(|order| order.created_at);
    Ok(active)
}

/// Number of orders per status.
pub fn count_by_status(conn: &Connection, status: OrderStatus) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE status = ?1",
        [status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crypto::ed25519::KeyPair;
    use tessera_types::escrow::TimeWindows;
    use tessera_types::order::{AssetAmount, OrderIntent, OrderWindows};
    use tessera_types::{Address, AssetId, ChainId};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn order(created_at: u64) -> Order {
        let maker = KeyPair::from_bytes(&[1; 32]);
        let intent = OrderIntent {
            source_chain: ChainId::new("src"),
            destination_chain: ChainId::new("dst"),
            maker_source_address: Address::from_public_key(&maker.verifying_key),
            maker_destination_address: Address::new([2; 32]),
            maker_public_key: maker.verifying_key,
            source: AssetAmount {
                asset: AssetId::new("sui"),
                amount: 1_000,
            },
            destination: AssetAmount {
                asset: AssetId::new("eth"),
                amount: u128::MAX,
            },
            total_parts: 2,
            merkle_root: [3; 32],
            leaf_hashes: vec![[4; 32], [5; 32], [6; 32]],
            windows: OrderWindows {
                source: TimeWindows::from_durations(0, 10, 10, 10),
                destination: TimeWindows::from_durations(0, 5, 5, 5),
            },
            deadline: 9,
            created_at,
        };
        Order::new(intent, created_at)
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = test_db();
        let mut o = order(10);
        upsert(&conn, &o).expect("insert");
        assert_eq!(get(&conn, &o.order_id).expect("get"), o);

        o.status = OrderStatus::Claimed;
        o.updated_at = 20;
        upsert(&conn, &o).expect("update");
        let loaded = get(&conn, &o.order_id).expect("get");
        assert_eq!(loaded.status, OrderStatus::Claimed);
        assert_eq!(loaded.intent.destination.amount, u128::MAX);
    }

    #[test]
    fn test_get_missing() {
        let conn = test_db();
        assert!(matches!(
            get(&conn, &OrderId::new([9; 32])),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_filters_status() {
        let conn = test_db();
        let open = order(1);
        let mut done = order(2);
        done.status = OrderStatus::Completed;
        let mut claimed = order(3);
        claimed.status = OrderStatus::Claimed;
        for o in [&open, &done, &claimed] {
            upsert(&conn, o).expect("insert");
        }

        assert_eq!(list(&conn, None).expect("all").len(), 3);
        assert_eq!(
            list(&conn, Some(OrderStatus::Completed)).expect("done")[0].order_id,
            done.order_id
        );
        let active: Vec<OrderId> = list_active(&conn)
            .expect("active")
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(active, vec![open.order_id, claimed.order_id]);
        assert_eq!(count_by_status(&conn, OrderStatus::Open).expect("count"), 1);
    }
}
