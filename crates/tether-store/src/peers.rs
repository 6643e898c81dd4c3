//! Associated-peer CRUD.
//!
//! All operations go through [`PeerStore`], which owns the connection
//! behind an async lock: mutation is serial, and these calls are the only
//! suspension points that may block on disk I/O.

use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use tether_crypto::{hmac, KeyWrapper};
use tether_types::{AssociatedPeer, DeviceId, IdentificationKey, MacAddress};

use crate::{Result, StoreError};

/// Input to [`PeerStore::add`].
pub struct NewPeerRecord {
    pub device_id: DeviceId,
    pub identification_key: IdentificationKey,
    /// Last session encryption key, when the caller persists one.
    pub encryption_key: Option<Vec<u8>>,
    pub mac_address: MacAddress,
    pub name: Option<String>,
}

/// Handle to the associated-peer table and the local device id.
#[derive(Clone)]
pub struct PeerStore {
    conn: Arc<Mutex<Connection>>,
    wrapper: Arc<dyn KeyWrapper>,
}

impl PeerStore {
    /// Wrap an opened connection (see [`crate::open`] / [`crate::open_memory`]).
    pub fn new(conn: Connection, wrapper: Arc<dyn KeyWrapper>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            wrapper,
        }
    }

    /// Insert a peer record, wrapping its key material.
    ///
    /// Adding an existing `device_id` replaces the prior record in place; a
    /// user-assigned name survives the replacement.
    pub async fn add(&self, record: NewPeerRecord) -> Result<()> {
        let wrapped_identification = self
            .wrapper
            .wrap(record.identification_key.as_bytes())?;
        let wrapped_encryption = record
            .encryption_key
            .as_deref()
            .map(|key| self.wrapper.wrap(key))
            .transpose()?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO associated_peers
                 (device_id, wrapped_encryption_key, wrapped_identification_key,
                  mac_address, name, is_user_renamed, added_order)
             VALUES (?1, ?2, ?3, ?4, ?5, 0,
                 (SELECT COALESCE(MAX(added_order), 0) + 1 FROM associated_peers))
             ON CONFLICT(device_id) DO UPDATE SET
                 wrapped_encryption_key = excluded.wrapped_encryption_key,
                 wrapped_identification_key = excluded.wrapped_identification_key,
                 mac_address = excluded.mac_address,
                 name = CASE WHEN is_user_renamed THEN name ELSE excluded.name END",
            params![
                record.device_id.as_bytes().as_slice(),
                wrapped_encryption,
                wrapped_identification,
                record.mac_address.to_string(),
                record.name,
            ],
        )?;
        tracing::debug!(device_id = %record.device_id, "peer record stored");
        Ok(())
    }

    /// Delete one peer. Returns whether a record existed.
    pub async fn clear(&self, device_id: DeviceId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM associated_peers WHERE device_id = ?1",
            params![device_id.as_bytes().as_slice()],
        )?;
        Ok(deleted > 0)
    }

    /// Delete every peer. Returns the number of records removed.
    pub async fn clear_all(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM associated_peers", [])?;
        Ok(deleted)
    }

    /// Rename a peer. Rejects empty names; marks the record user-renamed.
    pub async fn rename(&self, device_id: DeviceId, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(StoreError::InvalidName);
        }
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE associated_peers SET name = ?2, is_user_renamed = 1
             WHERE device_id = ?1",
            params![device_id.as_bytes().as_slice(), new_name],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownPeer(device_id));
        }
        Ok(())
    }

    /// All peer records in the order they were first added.
    pub async fn retrieve_all(&self) -> Result<Vec<AssociatedPeer>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT device_id, mac_address, name, is_user_renamed
             FROM associated_peers ORDER BY added_order",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut peers = Vec::new();
        for row in rows {
            let (id_bytes, mac, name, is_user_renamed) = row?;
            peers.push(AssociatedPeer {
                device_id: decode_device_id(&id_bytes)?,
                mac_address: decode_mac(&mac)?,
                name,
                is_user_renamed,
            });
        }
        Ok(peers)
    }

    /// Whether any peer is associated.
    pub async fn is_associated(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM associated_peers", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Whether a peer with the given MAC address is associated.
    pub async fn is_associated_mac(&self, mac_address: MacAddress) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM associated_peers WHERE mac_address = ?1",
            params![mac_address.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// MAC address of a peer, if associated.
    pub async fn mac_address(&self, device_id: DeviceId) -> Result<Option<MacAddress>> {
        let conn = self.conn.lock().await;
        let mac: Option<String> = conn
            .query_row(
                "SELECT mac_address FROM associated_peers WHERE device_id = ?1",
                params![device_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        mac.map(|m| decode_mac(&m)).transpose()
    }

    /// Display name of a peer, if associated and named.
    pub async fn name(&self, device_id: DeviceId) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let name: Option<Option<String>> = conn
            .query_row(
                "SELECT name FROM associated_peers WHERE device_id = ?1",
                params![device_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.flatten())
    }

    /// The last persisted session encryption key, if any.
    pub async fn load_encryption_key(&self, device_id: DeviceId) -> Result<Option<Vec<u8>>> {
        let wrapped: Option<Option<Vec<u8>>> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT wrapped_encryption_key FROM associated_peers WHERE device_id = ?1",
                params![device_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?
        };
        match wrapped.flatten() {
            Some(bytes) => Ok(Some(self.wrapper.unwrap_key(&bytes)?)),
            None => Ok(None),
        }
    }

    /// `HMAC-SHA256(identification_key, data)` for reconnection
    /// verification and advertisement challenges.
    ///
    /// This is the only way identification-key material is used after
    /// storage; the plaintext key never crosses the store boundary.
    pub async fn hmac_with_identification_key(
        &self,
        device_id: DeviceId,
        data: &[u8],
    ) -> Result<Option<[u8; 32]>> {
        let wrapped: Option<Vec<u8>> = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT wrapped_identification_key FROM associated_peers WHERE device_id = ?1",
                params![device_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(wrapped) = wrapped else {
            return Ok(None);
        };
        let key = Zeroizing::new(self.wrapper.unwrap_key(&wrapped)?);
        let tag = hmac::sign(&key, data)?;
        Ok(Some(tag))
    }

    /// This device's own stable identifier, generated and persisted on
    /// first access.
    pub async fn local_device_id(&self) -> Result<DeviceId> {
        let conn = self.conn.lock().await;
        let existing: Option<Vec<u8>> = conn
            .query_row("SELECT device_id FROM local_device WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(bytes) = existing {
            return decode_device_id(&bytes);
        }

        let fresh = DeviceId::random();
        conn.execute(
            "INSERT INTO local_device (id, device_id) VALUES (1, ?1)",
            params![fresh.as_bytes().as_slice()],
        )?;
        tracing::info!(device_id = %fresh, "generated local device id");
        Ok(fresh)
    }
}

fn decode_device_id(bytes: &[u8]) -> Result<DeviceId> {
    DeviceId::from_slice(bytes)
        .ok_or_else(|| StoreError::Corrupt(format!("device id of {} bytes", bytes.len())))
}

fn decode_mac(text: &str) -> Result<MacAddress> {
    text.parse()
        .map_err(|_| StoreError::Corrupt(format!("mac address {text:?}")))
}
