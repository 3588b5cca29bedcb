//! Token sealing using AES-256-GCM with a versioned key ring
//!
//! Access and refresh tokens are stored in the database only as ciphertext
//! produced here, with additional authenticated data (AAD) binding each
//! payload to its owning integration. The key ring carries every key that is
//! still allowed to decrypt; new ciphertext is always sealed under the
//! newest key, so keys can be rotated without re-encrypting existing rows on
//! a flag day.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const KEY_ID_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = KEY_ID_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("ciphertext sealed under unknown key id {0}")]
    UnknownKeyId(u8),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("key ring must hold between 1 and 255 keys, got {0}")]
    InvalidRingSize(usize),
}

/// Secure wrapper for a single 32-byte encryption key with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey(Vec<u8>);

impl SealingKey {
    /// Create a new sealing key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::EncryptionFailed(
                "Invalid key length: expected 32 bytes".to_string(),
            ));
        }
        Ok(SealingKey(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Ordered list of sealing keys, oldest first. The position in the list
/// (1-based) is the key id written into each ciphertext; id 0 is reserved.
#[derive(Debug, Clone)]
pub struct KeyRing {
    keys: Vec<SealingKey>,
}

impl KeyRing {
    /// Build a ring from raw 32-byte keys, oldest first.
    pub fn new(raw_keys: Vec<Vec<u8>>) -> Result<Self, CryptoError> {
        if raw_keys.is_empty() || raw_keys.len() > 255 {
            return Err(CryptoError::InvalidRingSize(raw_keys.len()));
        }
        let keys = raw_keys
            .into_iter()
            .map(SealingKey::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }

    /// Key id new ciphertext will be sealed under.
    pub fn current_key_id(&self) -> u8 {
        self.keys.len() as u8
    }

    fn current_key(&self) -> &SealingKey {
        self.keys.last().expect("ring is never empty")
    }

    fn key_for_id(&self, id: u8) -> Option<&SealingKey> {
        if id == 0 {
            return None;
        }
        self.keys.get(id as usize - 1)
    }
}

/// Seal bytes under the ring's newest key.
///
/// Output layout: `[key id][12-byte nonce][ciphertext + tag]`.
pub fn seal_bytes(ring: &KeyRing, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(ring.current_key().as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(KEY_ID_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(ring.current_key_id());
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Open ciphertext sealed by [`seal_bytes`], selecting the key by the id
/// byte. Fails closed on anything it does not recognize: there is no
/// plaintext passthrough.
pub fn open_bytes(ring: &KeyRing, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let key_id = sealed[0];
    let key = ring
        .key_for_id(key_id)
        .ok_or(CryptoError::UnknownKeyId(key_id))?;

    let nonce = Nonce::from_slice(&sealed[KEY_ID_FIELD_LEN..KEY_ID_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &sealed[KEY_ID_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Key id a sealed payload was produced under.
pub fn sealed_key_id(sealed: &[u8]) -> Option<u8> {
    if sealed.len() >= MIN_SEALED_LEN {
        Some(sealed[0])
    } else {
        None
    }
}
