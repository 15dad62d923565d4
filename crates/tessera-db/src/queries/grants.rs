//! Issued authorization grants.
//!
//! Every grant the relayer signs is recorded before it leaves the process.
//! The nonce is the primary key, so a repeated nonce is refused here as well.

use rusqlite::Connection;
use tessera_auth::AuthorizationGrant;
use tessera_types::{FillId, OrderId};

use crate::{constraint, DbError, Result};

/// Record a newly issued grant.
///
/// # Errors
///
/// - [`DbError::Constraint`] if a grant with the same nonce exists
pub fn insert(
    conn: &Connection,
    grant: &AuthorizationGrant,
    order_id: &OrderId,
    fill_id: &FillId,
    issued_at: u64,
) -> Result<()> {
    let json = serde_json::to_string(grant)?;
    conn.execute(
        "INSERT INTO grants (nonce, order_id, fill_id, escrow_id, resolver,
                             start_index, end_index, grant_json, issued_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            grant.nonce as i64,
            order_id.as_bytes().as_slice(),
            fill_id.as_bytes().as_slice(),
            grant.escrow_id.as_bytes().as_slice(),
            grant.authorized_resolver.as_bytes().as_slice(),
            grant.start_index,
            grant.end_index,
            json,
            issued_at as i64,
        ],
    )
    .map_err(|e| constraint(e, &format!("grant nonce {}", grant.nonce)))?;
    Ok(())
}

/// Grants issued for one fill, in nonce order.
pub fn for_fill(conn: &Connection, fill_id: &FillId) -> Result<Vec<AuthorizationGrant>> {
    let mut stmt =
        conn.prepare("SELECT grant_json FROM grants WHERE fill_id = ?1 ORDER BY nonce")?;
    let rows = stmt
        .query_map([fill_id.as_bytes().as_slice()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|json| serde_json::from_str(json).map_err(DbError::from))
        .collect()
}

/// Highest recorded nonce, or 0.
pub fn max_nonce(conn: &Connection) -> Result<u64> {
    let max: i64 = conn.query_row("SELECT COALESCE(MAX(nonce), 0) FROM grants", [], |row| {
        row.get(0)
    })?;
    Ok(max as u64)
}

/// Total number of recorded grants.
pub fn count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM grants", [], |row| row.get(0))?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_auth::sign_grant;
    use tessera_crypto::ed25519::KeyPair;
    use tessera_types::{Address, EscrowId};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn grant(nonce: u64) -> AuthorizationGrant {
        let relayer = KeyPair::from_bytes(&[7; 32]);
        sign_grant(
            EscrowId::new([1; 32]),
            Address::new([2; 32]),
            1,
            3,
            nonce,
            &relayer.signing_key,
        )
    }

    #[test]
    fn test_insert_and_load() {
        let conn = test_db();
        let order = OrderId::new([1; 32]);
        let fill = FillId::new([2; 32]);
        insert(&conn, &grant(2), &order, &fill, 100).expect("insert");
        insert(&conn, &grant(1), &order, &fill, 100).expect("insert");
        insert(&conn, &grant(3), &order, &FillId::new([3; 32]), 100).expect("insert");

        let loaded = for_fill(&conn, &fill).expect("load");
        assert_eq!(loaded, vec![grant(1), grant(2)]);
        assert_eq!(max_nonce(&conn).expect("max"), 3);
        assert_eq!(count(&conn).expect("count"), 3);
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let conn = test_db();
        let order = OrderId::new([1; 32]);
        let fill = FillId::new([2; 32]);
        insert(&conn, &grant(5), &order, &fill, 100).expect("insert");
        assert!(matches!(
            insert(&conn, &grant(5), &order, &fill, 101),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_empty_max_nonce() {
        let conn = test_db();
        assert_eq!(max_nonce(&conn).expect("max"), 0);
    }
}
