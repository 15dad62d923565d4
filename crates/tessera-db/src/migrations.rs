//! Forward-only schema migrations keyed on `PRAGMA user_version`.

use rusqlite::{params, Connection};
use tracing::info;

use crate::queries::settings::LAST_GRANT_NONCE;
use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Settings every fresh relayer database starts with.
const DEFAULT_SETTINGS: &[(&str, &str)] = &[(LAST_GRANT_NONCE, "0")];

/// Bring `conn` up to [`SCHEMA_VERSION`].
///
/// # Errors
///
/// - [`DbError::Migration`] if the file was written by a newer relayer or no
///   step exists for a version in between
pub fn run(conn: &Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    match found {
        0 => {
            info!(version = SCHEMA_VERSION, "creating relayer schema");
            conn.execute_batch(schema::SCHEMA_V1)?;
            seed_settings(conn)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        v if v > SCHEMA_VERSION => {
            return Err(DbError::Migration(format!(
                "schema v{v} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        v => {
            for next in (v + 1)..=SCHEMA_VERSION {
                info!(from = next - 1, to = next, "migrating relayer schema");
                step(conn, next)?;
                conn.pragma_update(None, "user_version", next)?;
            }
        }
    }
    Ok(())
}

fn seed_settings(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
    for (key, value) in DEFAULT_SETTINGS {
        stmt.execute(params![key, value])?;
    }
    Ok(())
}

// v1 is created whole; later versions add their statements here.
fn step(_conn: &Connection, version: u32) -> Result<()> {
    Err(DbError::Migration(format!("no migration to v{version}")))
}
