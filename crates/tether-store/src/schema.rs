//! SQL schema definitions.

/// Complete schema for the tether store.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS associated_peers (
    device_id BLOB PRIMARY KEY,
    wrapped_encryption_key BLOB,
    wrapped_identification_key BLOB NOT NULL,
    mac_address TEXT NOT NULL,
    name TEXT,
    is_user_renamed INTEGER NOT NULL DEFAULT 0,
    added_order INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_peers_mac ON associated_peers(mac_address);

CREATE TABLE IF NOT EXISTS local_device (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    device_id BLOB NOT NULL
);
"#;
