//! SQLite-backed identity, contact and message store.
//!
//! One file per device. The connection sits behind a mutex so the runtime
//! executor can reach it through the `Persistence` trait from any task.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use kenet_protocol::{
    GeoPoint, KenetError, KeyPair, LocalIdentity, NodeId, PacketId, Persistence, StoredMessage,
};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("identity already exists ({0})")]
    IdentityExists(NodeId),

    #[error("no identity in store; run `kenet-node init` first")]
    NoIdentity,

    #[error("no outbound message {0}")]
    UnknownMessage(PacketId),
}

impl From<StoreError> for KenetError {
    fn from(e: StoreError) -> Self {
        KenetError::Persistence(e.to_string())
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS identity (
        slot INTEGER PRIMARY KEY CHECK (slot = 0),
        node_id TEXT NOT NULL,
        secret_key TEXT NOT NULL,
        lat REAL NOT NULL,
        lng REAL NOT NULL
    );
    CREATE TABLE IF NOT EXISTS contacts (
        node_id TEXT PRIMARY KEY,
        public_key TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS locations (
        node_id TEXT PRIMARY KEY,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        packet_id TEXT PRIMARY KEY,
        peer TEXT NOT NULL,
        body BLOB NOT NULL,
        timestamp INTEGER NOT NULL,
        outbound INTEGER NOT NULL,
        delivered INTEGER NOT NULL DEFAULT 0
    );
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create this device's identity with a fresh keypair.
    pub fn init_identity(&self, id: NodeId, position: GeoPoint) -> Result<LocalIdentity, StoreError> {
        if let Some(existing) = self.identity()? {
            return Err(StoreError::IdentityExists(existing.id));
        }
        let keys = KeyPair::generate();
        self.lock().execute(
            "INSERT INTO identity (slot, node_id, secret_key, lat, lng) VALUES (0, ?1, ?2, ?3, ?4)",
            params![
                id.as_str(),
                hex::encode(keys.secret_bytes()),
                f64::from(position.lat),
                f64::from(position.lng)
            ],
        )?;
        tracing::info!(%id, "identity created");
        Ok(LocalIdentity { id, position, keys })
    }

    pub fn identity(&self) -> Result<Option<LocalIdentity>, StoreError> {
        let row = self
            .lock()
            .query_row(
                "SELECT node_id, secret_key, lat, lng FROM identity WHERE slot = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, secret, lat, lng)| {
            Ok(LocalIdentity {
                id: NodeId::new(id),
                position: GeoPoint::new(lat as f32, lng as f32),
                keys: KeyPair::from_secret_bytes(parse_key(&secret)?),
            })
        })
        .transpose()
    }

    /// Persist a new fix for this device.
    pub fn set_position(&self, position: GeoPoint) -> Result<(), StoreError> {
        let changed = self.lock().execute(
            "UPDATE identity SET lat = ?1, lng = ?2 WHERE slot = 0",
            params![f64::from(position.lat), f64::from(position.lng)],
        )?;
        if changed == 0 {
            return Err(StoreError::NoIdentity);
        }
        Ok(())
    }

    pub fn add_contact(&self, id: &NodeId, public_key: [u8; 32]) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT OR REPLACE INTO contacts (node_id, public_key) VALUES (?1, ?2)",
            params![id.as_str(), hex::encode(public_key)],
        )?;
        Ok(())
    }

    pub fn set_location(&self, id: &NodeId, position: GeoPoint) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT OR REPLACE INTO locations (node_id, lat, lng, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id.as_str(),
                f64::from(position.lat),
                f64::from(position.lng),
                kenet_protocol::now_ms() as i64
            ],
        )?;
        Ok(())
    }

    pub fn contact_key(&self, id: &NodeId) -> Result<Option<[u8; 32]>, StoreError> {
        let hex_key: Option<String> = self
            .lock()
            .query_row(
                "SELECT public_key FROM contacts WHERE node_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        hex_key.map(|k| parse_key(&k)).transpose()
    }

    pub fn location(&self, id: &NodeId) -> Result<Option<GeoPoint>, StoreError> {
        let position = self
            .lock()
            .query_row(
                "SELECT lat, lng FROM locations WHERE node_id = ?1",
                params![id.as_str()],
                |row| {
                    let lat: f64 = row.get(0)?;
                    let lng: f64 = row.get(1)?;
                    Ok(GeoPoint::new(lat as f32, lng as f32))
                },
            )
            .optional()?;
        Ok(position)
    }

    /// Conversation with `peer`, oldest first.
    pub fn messages_with(&self, peer: &NodeId) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT packet_id, peer, body, timestamp, outbound, delivered
             FROM messages WHERE peer = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![peer.as_str()], |row| {
            let id: String = row.get(0)?;
            let packet_id = id.parse::<PacketId>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Ok(StoredMessage {
                packet_id,
                peer: NodeId::new(row.get::<_, String>(1)?),
                plaintext: row.get(2)?,
                timestamp: row.get::<_, i64>(3)? as u64,
                outbound: row.get(4)?,
                delivered: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn insert_message(
        &self,
        packet_id: &PacketId,
        peer: &NodeId,
        body: &[u8],
        timestamp: u64,
        outbound: bool,
    ) -> Result<(), StoreError> {
        self.lock().execute(
            "INSERT OR IGNORE INTO messages (packet_id, peer, body, timestamp, outbound)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                packet_id.to_string(),
                peer.as_str(),
                body,
                timestamp as i64,
                outbound
            ],
        )?;
        Ok(())
    }

    fn mark_delivered(&self, packet_id: &PacketId) -> Result<(), StoreError> {
        let changed = self.lock().execute(
            "UPDATE messages SET delivered = 1 WHERE packet_id = ?1 AND outbound = 1",
            params![packet_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownMessage(*packet_id));
        }
        Ok(())
    }
}

impl Persistence for SqliteStore {
    fn load_own_identity(&self) -> Result<LocalIdentity, KenetError> {
        Ok(self.identity()?.ok_or(StoreError::NoIdentity)?)
    }

    fn load_contact_public_key(&self, contact: &NodeId) -> Result<Option<[u8; 32]>, KenetError> {
        Ok(self.contact_key(contact)?)
    }

    fn load_contact_location(&self, contact: &NodeId) -> Result<Option<GeoPoint>, KenetError> {
        Ok(self.location(contact)?)
    }

    fn store_inbound_message(
        &self,
        packet_id: &PacketId,
        sender: &NodeId,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<(), KenetError> {
        Ok(self.insert_message(packet_id, sender, plaintext, timestamp, false)?)
    }

    fn store_outbound_message(
        &self,
        packet_id: &PacketId,
        recipient: &NodeId,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<(), KenetError> {
        Ok(self.insert_message(packet_id, recipient, plaintext, timestamp, true)?)
    }

    fn mark_message_delivered(&self, packet_id: &PacketId) -> Result<(), KenetError> {
        Ok(self.mark_delivered(packet_id)?)
    }

    fn update_contact_location(
        &self,
        contact: &NodeId,
        position: GeoPoint,
    ) -> Result<(), KenetError> {
        Ok(self.set_location(contact, position)?)
    }
}

/// Parse a 32-byte key from hex.
pub fn parse_key(hex_key: &str) -> Result<[u8; 32], StoreError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|e| StoreError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| StoreError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("kenet.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn identity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kenet.db");
        let created = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .init_identity(NodeId::new("Ayse"), GeoPoint::new(41.0, 29.0))
                .unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.load_own_identity().unwrap();
        assert_eq!(loaded.id, NodeId::new("ayse"));
        assert_eq!(loaded.position, GeoPoint::new(41.0, 29.0));
        assert_eq!(loaded.keys.public_key(), created.keys.public_key());
    }

    #[test]
    fn second_init_is_refused() {
        let (_dir, store) = temp_store();
        store.init_identity(NodeId::new("a"), GeoPoint::default()).unwrap();
        let err = store
            .init_identity(NodeId::new("b"), GeoPoint::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentityExists(ref id) if id.as_str() == "a"));
    }

    #[test]
    fn missing_identity_is_a_persistence_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.load_own_identity(),
            Err(KenetError::Persistence(_))
        ));
        assert!(matches!(
            store.set_position(GeoPoint::default()),
            Err(StoreError::NoIdentity)
        ));
    }

    #[test]
    fn position_update_is_persisted() {
        let (_dir, store) = temp_store();
        store.init_identity(NodeId::new("a"), GeoPoint::default()).unwrap();
        store.set_position(GeoPoint::new(39.9, 32.8)).unwrap();
        assert_eq!(
            store.load_own_identity().unwrap().position,
            GeoPoint::new(39.9, 32.8)
        );
    }

    #[test]
    fn contacts_and_locations() {
        let (_dir, store) = temp_store();
        let bob = NodeId::new("bob");
        assert_eq!(store.load_contact_public_key(&bob).unwrap(), None);
        assert_eq!(store.load_contact_location(&bob).unwrap(), None);

        store.add_contact(&bob, [7u8; 32]).unwrap();
        assert_eq!(store.load_contact_public_key(&bob).unwrap(), Some([7u8; 32]));

        store
            .update_contact_location(&bob, GeoPoint::new(38.4, 27.1))
            .unwrap();
        store
            .update_contact_location(&bob, GeoPoint::new(38.5, 27.2))
            .unwrap();
        assert_eq!(
            store.load_contact_location(&bob).unwrap(),
            Some(GeoPoint::new(38.5, 27.2))
        );
    }

    #[test]
    fn outbound_message_lifecycle() {
        let (_dir, store) = temp_store();
        let bob = NodeId::new("bob");
        let out = PacketId::random();
        let inbound = PacketId::random();

        store.store_outbound_message(&out, &bob, b"selam", 10).unwrap();
        store.store_inbound_message(&inbound, &bob, b"merhaba", 20).unwrap();
        // Inbound rows are never marked delivered.
        assert!(store.mark_message_delivered(&inbound).is_err());
        store.mark_message_delivered(&out).unwrap();

        let history = store.messages_with(&bob).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].packet_id, out);
        assert!(history[0].outbound && history[0].delivered);
        assert_eq!(history[1].plaintext, b"merhaba");
        assert!(!history[1].outbound && !history[1].delivered);
    }

    #[test]
    fn key_parsing() {
        assert_eq!(parse_key(&"ab".repeat(32)).unwrap(), [0xab; 32]);
        assert!(matches!(parse_key("abcd"), Err(StoreError::InvalidKey(_))));
        assert!(matches!(parse_key("zz"), Err(StoreError::InvalidKey(_))));
    }
}
