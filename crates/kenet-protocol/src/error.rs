use crate::packet::PacketKind;

/// Why a frame could not be turned into a [`Packet`](crate::Packet).
///
/// Always recoverable: the frame is dropped and the session keeps going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("unknown packet kind tag {0:#04x}")]
    UnknownKind(u8),

    #[error("kind mismatch: header says {header:?}, payload is {payload:?}")]
    KindMismatch {
        header: PacketKind,
        payload: PacketKind,
    },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Seal/open failures. Recoverable: the message is dropped and not acked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid {field} length: expected {expected}, got {got}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("key exchange produced a non-contributory shared secret")]
    WeakKey,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    #[error("authentication failed")]
    Authentication,
}

/// Top-level error for the Kenet protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum KenetError {
    /// Fatal to the current link; the owner should reconnect.
    #[error("transport error: {0}")]
    Transport(#[from] kenet_transport::LinkError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("unknown contact: {0}")]
    UnknownContact(String),

    #[error("delivery tracker full ({0} messages awaiting delivery)")]
    TrackerFull(usize),

    /// The encoded packet would not fit in one link frame.
    #[error("packet too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime shut down")]
    Shutdown,
}

impl From<rmp_serde::encode::Error> for KenetError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        KenetError::Encode(e.to_string())
    }
}
