use std::fmt;

use serde::{Deserialize, Serialize};

/// Node identity as carried on the wire (the account's user id).
///
/// Identifiers compare case-insensitively, so they are folded to lowercase
/// on construction and on decode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_ascii_lowercase())
    }

    /// Pseudo-target of hello beacons: every direct neighbor.
    pub fn broadcast() -> Self {
        Self::new(BROADCAST_ID)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ID_LOWER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const BROADCAST_ID: &str = "BROADCAST";
const BROADCAST_ID_LOWER: &str = "broadcast";

/// 16-byte packet identifier, unique per logical packet at origination.
///
/// Replies and acknowledgments reuse the id of the packet they answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketId(uuid::Uuid);

impl PacketId {
    /// Fresh random (v4) identifier.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PacketId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// A WGS-84 position as carried on the wire (single precision).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f32,
    pub lng: f32,
}

impl GeoPoint {
    pub fn new(lat: f32, lng: f32) -> Self {
        Self { lat, lng }
    }

    /// Great-circle (haversine) distance in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let (lat1, lng1) = (f64::from(self.lat).to_radians(), f64::from(self.lng).to_radians());
        let (lat2, lng2) = (f64::from(other.lat).to_radians(), f64::from(other.lng).to_radians());
        let dlat = lat2 - lat1;
        let dlng = lng2 - lng1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// Mean Earth radius (IUGG), meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Hop budget for Discovery floods and the Reply sent back.
pub const FLOOD_TTL: u32 = 64;

/// Hop budget for originated Messages and their Acks.
pub const MESSAGE_TTL: u32 = 10;

/// Hop budget for gateway (SMS bridge) packets.
pub const GATEWAY_TTL: u32 = 20;

/// Hello beacons reach direct neighbors only.
pub const BEACON_TTL: u32 = 1;

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
