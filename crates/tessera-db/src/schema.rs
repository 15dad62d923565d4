//! SQL schema definitions.

/// Complete schema for Tessera v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Orders
-- ============================================================

CREATE TABLE IF NOT EXISTS orders (
    order_id BLOB PRIMARY KEY,
    status TEXT NOT NULL,
    maker_public_key BLOB NOT NULL,
    source_chain TEXT NOT NULL,
    destination_chain TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);

-- ============================================================
-- Authorization grants (one row per issued grant)
-- ============================================================

CREATE TABLE IF NOT EXISTS grants (
    nonce INTEGER PRIMARY KEY,
    order_id BLOB NOT NULL,
    fill_id BLOB NOT NULL,
    escrow_id BLOB NOT NULL,
    resolver BLOB NOT NULL,
    start_index INTEGER NOT NULL,
    end_index INTEGER NOT NULL,
    grant_json TEXT NOT NULL,
    issued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_grants_fill ON grants(fill_id);

-- ============================================================
-- Settings (key/value)
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- ============================================================
-- Maker-side secret storage
-- ============================================================

CREATE TABLE IF NOT EXISTS maker_secrets (
    order_id BLOB NOT NULL,
    secret_index INTEGER NOT NULL,
    secret BLOB NOT NULL,
    disclosed_at INTEGER,
    PRIMARY KEY (order_id, secret_index)
);
"#;
