//! Packet authentication for the signed protocol.
//!
//! Every signed datagram carries an HMAC-SHA256 computed with a pre-shared
//! key over the timestamp and payload. Receivers hold an ordered set of
//! keys so a fleet can rotate: add the new key everywhere, move it to the
//! front on senders, then drop the old one.
//!
//! Key material derives ZeroizeOnDrop — wiped from memory when dropped.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wire::HMAC_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Length of pre-shared key material. Shorter passphrases are zero-padded.
pub const KEY_LENGTH: usize = 32;

// ── Keys ──────────────────────────────────────────────────────────────────────

/// One pre-shared key, fixed at KEY_LENGTH bytes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PreSharedKey([u8; KEY_LENGTH]);

impl PreSharedKey {
    /// Build a key from a configured passphrase.
    ///
    /// The passphrase bytes are copied into a zeroed KEY_LENGTH buffer.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        let bytes = passphrase.as_bytes();
        if bytes.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        if bytes.len() > KEY_LENGTH {
            return Err(CryptoError::KeyTooLong(bytes.len()));
        }

        let mut key = [0u8; KEY_LENGTH];
        key[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(key))
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        HmacSha256::new_from_slice(&self.0).map_err(|_| CryptoError::InvalidKeyLength)
    }

    /// HMAC-SHA256 of `data` under this key.
    pub fn sign(&self, data: &[u8]) -> Result<[u8; HMAC_SIZE], CryptoError> {
        let mut mac = self.mac()?;
        mac.update(data);
        let mut tag = [0u8; HMAC_SIZE];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    /// Constant-time check of `tag` against the HMAC of `data`.
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(data);
                mac.verify_slice(tag).is_ok()
            }
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PreSharedKey(..)")
    }
}

/// Ordered set of pre-shared keys.
///
/// Verification accepts the first key that matches; signing always uses the
/// first key.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<PreSharedKey>,
}

impl KeySet {
    /// Build from configured passphrases, preserving order.
    pub fn from_passphrases<S: AsRef<str>>(passphrases: &[S]) -> Result<Self, CryptoError> {
        let keys = passphrases
            .iter()
            .map(|p| PreSharedKey::from_passphrase(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// The key senders sign with.
    pub fn primary(&self) -> Option<&PreSharedKey> {
        self.keys.first()
    }

    /// Index of the first key whose HMAC over `data` equals `tag`.
    pub fn find_match(&self, data: &[u8], tag: &[u8]) -> Option<usize> {
        self.keys.iter().position(|k| k.verify(data, tag))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("pre-shared key is empty")]
    EmptyKey,

    #[error("pre-shared key is {0} bytes, maximum is {}", KEY_LENGTH)]
    KeyTooLong(usize),

    #[error("HMAC rejected key length")]
    InvalidKeyLength,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
