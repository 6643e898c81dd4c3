//! # tether-store
//!
//! Persistent store for associated peers.
//!
//! Single SQLite database holding the peer table and the local device id.
//! Key material is always wrapped through the injected
//! [`KeyWrapper`](tether_crypto::KeyWrapper) before it reaches disk — the
//! store never persists plaintext secrets, and identification keys leave
//! the store only as HMAC input during reconnection verification.
//!
//! - WAL mode, foreign keys enforced
//! - Schema version in `PRAGMA user_version`
//! - All mutation is serialized behind one async lock; reads share it

pub mod migrations;
pub mod peers;
pub mod schema;

use std::path::Path;

use rusqlite::Connection;

pub use peers::{NewPeerRecord, PeerStore};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("no peer with device id {0}")]
    UnknownPeer(tether_types::DeviceId),

    #[error("peer name must not be empty")]
    InvalidName,

    #[error("key wrapping failed: {0}")]
    KeyWrap(#[from] tether_crypto::CryptoError),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open or create the store database at the given path.
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
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
