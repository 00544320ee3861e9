//! End-to-end encryption for Kenet payloads.
//!
//! Anonymous-sender public-key box: a fresh ephemeral X25519 keypair per
//! message, DH against the recipient's long-term X25519 key, HKDF-SHA256
//! key derivation, XChaCha20-Poly1305 with a detached 16-byte tag.
//!
//! Relays only see ciphertext; the tag is carried next to it on the wire.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::error::CryptoError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"kenet-e2e-x25519-xchacha20poly1305-v1";

pub const PUBLIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Long-term X25519 identity keypair.
#[derive(Clone)]
pub struct KeyPair {
    secret: X25519Secret,
    public: X25519PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        use chacha20poly1305::aead::rand_core::OsRng;
        Self::from_secret(X25519Secret::random_from_rng(OsRng))
    }

    /// Restore from a stored 32-byte secret.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(X25519Secret::from(bytes))
    }

    fn from_secret(secret: X25519Secret) -> Self {
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Raw secret for storage. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.to_bytes()))
            .finish_non_exhaustive()
    }
}

/// Output of [`seal`]: everything the recipient needs besides its secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub ephemeral_public_key: [u8; PUBLIC_KEY_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Derive the symmetric key. Both public keys go into the info so a box
/// cannot be re-targeted at another recipient.
fn derive_key(
    shared_secret: &[u8; 32],
    ephemeral_pk: &[u8; 32],
    recipient_pk: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand_multi_info(&[HKDF_INFO, ephemeral_pk, recipient_pk], &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(key)
}

/// Encrypt `plaintext` for the holder of `recipient_public_key`.
pub fn seal(plaintext: &[u8], recipient_public_key: &[u8; 32]) -> Result<SealedBox, CryptoError> {
    use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

    let recipient = X25519PublicKey::from(*recipient_public_key);
    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared = ephemeral_secret.diffie_hellman(&recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKey);
    }
    let key = derive_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient_public_key,
    )?;
    let cipher = XChaCha20Poly1305::new(&key.into());

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(XNonce::from_slice(&nonce), b"", &mut ciphertext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(&tag);

    Ok(SealedBox {
        ciphertext,
        nonce,
        ephemeral_public_key: ephemeral_public.to_bytes(),
        tag: tag_bytes,
    })
}

/// Decrypt a box addressed to `keys`.
///
/// Missing or wrong-length fields and any tag mismatch are errors, never
/// panics; the caller drops the message.
pub fn open(
    ciphertext: &[u8],
    tag: &[u8],
    nonce: &[u8],
    ephemeral_public_key: &[u8],
    keys: &KeyPair,
) -> Result<Vec<u8>, CryptoError> {
    let tag = fixed::<TAG_LEN>("integrity_tag", tag)?;
    let nonce = fixed::<NONCE_LEN>("nonce", nonce)?;
    let ephemeral_pk = fixed::<PUBLIC_KEY_LEN>("ephemeral_public_key", ephemeral_public_key)?;

    let shared = keys
        .secret
        .diffie_hellman(&X25519PublicKey::from(ephemeral_pk));
    if !shared.was_contributory() {
        return Err(CryptoError::WeakKey);
    }
    let key = derive_key(shared.as_bytes(), &ephemeral_pk, keys.public.as_bytes())?;
    let cipher = XChaCha20Poly1305::new(&key.into());

    let mut plaintext = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(&nonce),
            b"",
            &mut plaintext,
            Tag::from_slice(&tag),
        )
        .map_err(|_| CryptoError::Authentication)?;
    Ok(plaintext)
}

fn fixed<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    if bytes.is_empty() {
        return Err(CryptoError::MissingField(field));
    }
    bytes.try_into().map_err(|_| CryptoError::InvalidLength {
        field,
        expected: N,
        got: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_box(sealed: &SealedBox, keys: &KeyPair) -> Result<Vec<u8>, CryptoError> {
        open(
            &sealed.ciphertext,
            &sealed.tag,
            &sealed.nonce,
            &sealed.ephemeral_public_key,
            keys,
        )
    }

    #[test]
    fn seal_open_roundtrip() {
        let bob = KeyPair::generate();
        let sealed = seal(b"merhaba", &bob.public_key()).unwrap();
        assert_eq!(open_box(&sealed, &bob).unwrap(), b"merhaba");
    }

    #[test]
    fn ciphertext_has_plaintext_length_and_detached_tag() {
        let bob = KeyPair::generate();
        let sealed = seal(b"hello world", &bob.public_key()).unwrap();
        assert_eq!(sealed.ciphertext.len(), 11);
        assert_ne!(sealed.ciphertext, b"hello world");
    }

    #[test]
    fn wrong_recipient_fails() {
        let bob = KeyPair::generate();
        let eve = KeyPair::generate();
        let sealed = seal(b"secret", &bob.public_key()).unwrap();
        assert_eq!(open_box(&sealed, &eve), Err(CryptoError::Authentication));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let bob = KeyPair::generate();
        let mut sealed = seal(b"secret", &bob.public_key()).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert_eq!(open_box(&sealed, &bob), Err(CryptoError::Authentication));
    }

    #[test]
    fn tampered_tag_fails() {
        let bob = KeyPair::generate();
        let mut sealed = seal(b"secret", &bob.public_key()).unwrap();
        sealed.tag[15] ^= 0x80;
        assert_eq!(open_box(&sealed, &bob), Err(CryptoError::Authentication));
    }

    #[test]
    fn missing_fields_are_reported() {
        let bob = KeyPair::generate();
        let sealed = seal(b"x", &bob.public_key()).unwrap();
        let err = open(&sealed.ciphertext, &[], &sealed.nonce, &sealed.ephemeral_public_key, &bob);
        assert_eq!(err, Err(CryptoError::MissingField("integrity_tag")));
        let err = open(&sealed.ciphertext, &sealed.tag, &[], &sealed.ephemeral_public_key, &bob);
        assert_eq!(err, Err(CryptoError::MissingField("nonce")));
    }

    #[test]
    fn short_nonce_is_invalid_length() {
        let bob = KeyPair::generate();
        let sealed = seal(b"x", &bob.public_key()).unwrap();
        let err = open(
            &sealed.ciphertext,
            &sealed.tag,
            &sealed.nonce[..12],
            &sealed.ephemeral_public_key,
            &bob,
        );
        assert_eq!(
            err,
            Err(CryptoError::InvalidLength {
                field: "nonce",
                expected: 24,
                got: 12
            })
        );
    }

    #[test]
    fn low_order_recipient_key_is_rejected() {
        assert_eq!(seal(b"x", &[0u8; 32]), Err(CryptoError::WeakKey));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let bob = KeyPair::generate();
        let sealed = seal(b"", &bob.public_key()).unwrap();
        assert!(sealed.ciphertext.is_empty());
        assert_eq!(open_box(&sealed, &bob).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn keypair_restores_from_secret_bytes() {
        let keys = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(keys.secret_bytes());
        assert_eq!(restored.public_key(), keys.public_key());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keys = KeyPair::generate();
        let debug = format!("{keys:?}");
        assert!(debug.contains(&hex::encode(keys.public_key())));
        assert!(!debug.contains(&hex::encode(keys.secret_bytes())));
    }

    #[test]
    fn each_seal_uses_fresh_ephemeral_key_and_nonce() {
        let bob = KeyPair::generate();
        let a = seal(b"same", &bob.public_key()).unwrap();
        let b = seal(b"same", &bob.public_key()).unwrap();
        assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
