//! Collaborators the relay engine talks to but does not own.
//!
//! Storage, connectivity and the internet gateway live outside the protocol
//! core. The runtime only reaches them through these traits, from the
//! effect executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::crypto::KeyPair;
use crate::error::KenetError;
use crate::packet::GatewayPayload;
use crate::types::{GeoPoint, NodeId, PacketId};

/// Who this device is: id, last fix and long-term keys.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub id: NodeId,
    pub position: GeoPoint,
    pub keys: KeyPair,
}

/// Local message and contact storage.
pub trait Persistence: Send + Sync {
    fn load_own_identity(&self) -> Result<LocalIdentity, KenetError>;

    fn load_contact_public_key(&self, contact: &NodeId) -> Result<Option<[u8; 32]>, KenetError>;

    /// Last known position of a contact, if any.
    fn load_contact_location(&self, contact: &NodeId) -> Result<Option<GeoPoint>, KenetError>;

    fn store_inbound_message(
        &self,
        packet_id: &PacketId,
        sender: &NodeId,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<(), KenetError>;

    fn store_outbound_message(
        &self,
        packet_id: &PacketId,
        recipient: &NodeId,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<(), KenetError>;

    fn mark_message_delivered(&self, packet_id: &PacketId) -> Result<(), KenetError>;

    fn update_contact_location(&self, contact: &NodeId, position: GeoPoint)
        -> Result<(), KenetError>;
}

/// Does this device currently have internet access?
pub trait Connectivity: Send + Sync {
    fn has_internet(&self) -> bool;
}

/// Hands a gateway packet to the SMS bridge server.
#[async_trait::async_trait]
pub trait GatewayClient: Send + Sync {
    async fn submit(&self, packet: &GatewayPayload) -> Result<(), String>;
}

// ── Simple implementations ──────────────────────────────────────────────

/// Connectivity flag that can be flipped at runtime.
#[derive(Debug, Default)]
pub struct StaticConnectivity(AtomicBool);

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    pub fn set(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Connectivity for StaticConnectivity {
    fn has_internet(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gateway client for devices that never bridge; submissions are refused.
#[derive(Debug, Default)]
pub struct NoGateway;

#[async_trait::async_trait]
impl GatewayClient for NoGateway {
    async fn submit(&self, packet: &GatewayPayload) -> Result<(), String> {
        Err(format!("no gateway configured for {}", packet.packet_id))
    }
}

/// Stored chat message, as kept by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub packet_id: PacketId,
    pub peer: NodeId,
    pub plaintext: Vec<u8>,
    pub timestamp: u64,
    pub outbound: bool,
    pub delivered: bool,
}

#[derive(Debug, Default)]
struct MemoryInner {
    contacts: HashMap<NodeId, [u8; 32]>,
    locations: HashMap<NodeId, GeoPoint>,
    messages: Vec<StoredMessage>,
}

/// In-memory [`Persistence`], for tests and throwaway nodes.
#[derive(Debug)]
pub struct MemoryStore {
    identity: LocalIdentity,
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            identity,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    pub fn add_contact(&self, contact: NodeId, public_key: [u8; 32]) {
        self.lock().contacts.insert(contact, public_key);
    }

    pub fn set_contact_location(&self, contact: NodeId, position: GeoPoint) {
        self.lock().locations.insert(contact, position);
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.lock().messages.clone()
    }

    pub fn contact_location(&self, contact: &NodeId) -> Option<GeoPoint> {
        self.lock().locations.get(contact).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Persistence for MemoryStore {
    fn load_own_identity(&self) -> Result<LocalIdentity, KenetError> {
        Ok(self.identity.clone())
    }

    fn load_contact_public_key(&self, contact: &NodeId) -> Result<Option<[u8; 32]>, KenetError> {
        Ok(self.lock().contacts.get(contact).copied())
    }

    fn load_contact_location(&self, contact: &NodeId) -> Result<Option<GeoPoint>, KenetError> {
        Ok(self.contact_location(contact))
    }

    fn store_inbound_message(
        &self,
        packet_id: &PacketId,
        sender: &NodeId,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<(), KenetError> {
        self.lock().messages.push(StoredMessage {
            packet_id: *packet_id,
            peer: sender.clone(),
            plaintext: plaintext.to_vec(),
            timestamp,
            outbound: false,
            delivered: false,
        });
        Ok(())
    }

    fn store_outbound_message(
        &self,
        packet_id: &PacketId,
        recipient: &NodeId,
        plaintext: &[u8],
        timestamp: u64,
    ) -> Result<(), KenetError> {
        self.lock().messages.push(StoredMessage {
            packet_id: *packet_id,
            peer: recipient.clone(),
            plaintext: plaintext.to_vec(),
            timestamp,
            outbound: true,
            delivered: false,
        });
        Ok(())
    }

    fn mark_message_delivered(&self, packet_id: &PacketId) -> Result<(), KenetError> {
        let mut inner = self.lock();
        match inner
            .messages
            .iter_mut()
            .find(|m| m.outbound && &m.packet_id == packet_id)
        {
            Some(m) => {
                m.delivered = true;
                Ok(())
            }
            None => Err(KenetError::Persistence(format!(
                "no outbound message {packet_id}"
            ))),
        }
    }

    fn update_contact_location(
        &self,
        contact: &NodeId,
        position: GeoPoint,
    ) -> Result<(), KenetError> {
        self.lock().locations.insert(contact.clone(), position);
        Ok(())
    }
}
