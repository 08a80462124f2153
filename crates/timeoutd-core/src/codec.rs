//! Datagram codecs — bytes to Keepalive and back.
//!
//! `Codec::Simple` is the bare payload. `Codec::Signed` wraps it in a
//! KeepaliveHeader and checks, in order: length, magic, version, timestamp
//! window, HMAC, then payload charset. The first failing check decides the
//! WireError.

use zerocopy::{AsBytes, FromBytes};

use crate::crypto::KeySet;
use crate::wire::{
    Keepalive, KeepaliveHeader, WireError, DEFAULT_TIMEOUT_SECS, HEADER_MAGIC, HEADER_SIZE,
    HEADER_VERSION, SIGNED_OFFSET, TIMESTAMP_SLACK_SECS,
};

/// Unsigned variant. Only the payload rules apply.
#[derive(Debug, Clone)]
pub struct SimpleCodec {
    default_timeout: i32,
}

impl SimpleCodec {
    pub fn new(default_timeout: i32) -> Self {
        Self { default_timeout }
    }

    pub fn decode(&self, datagram: &[u8]) -> Result<Keepalive, WireError> {
        Keepalive::parse(datagram, self.default_timeout)
    }

    pub fn encode(&self, keepalive: &Keepalive) -> Vec<u8> {
        keepalive.to_payload().into_bytes()
    }
}

impl Default for SimpleCodec {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

/// HMAC-authenticated variant.
#[derive(Debug, Clone)]
pub struct SignedCodec {
    keys: KeySet,
    slack_secs: u64,
    default_timeout: i32,
}

impl SignedCodec {
    pub fn new(keys: KeySet, slack_secs: u64, default_timeout: i32) -> Self {
        Self {
            keys,
            slack_secs,
            default_timeout,
        }
    }

    /// Signed codec with the protocol's default slack and timeout.
    pub fn with_keys(keys: KeySet) -> Self {
        Self::new(keys, TIMESTAMP_SLACK_SECS, DEFAULT_TIMEOUT_SECS)
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    /// Build a signed datagram stamped with `timestamp` (unix seconds).
    pub fn encode(&self, keepalive: &Keepalive, timestamp: u32) -> Result<Vec<u8>, WireError> {
        let key = self.keys.primary().ok_or(WireError::NoSigningKey)?;
        let payload = keepalive.to_payload();

        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(KeepaliveHeader::unsigned(timestamp).as_bytes());
        packet.extend_from_slice(payload.as_bytes());

        let hmac = key
            .sign(&packet[SIGNED_OFFSET..])
            .map_err(|_| WireError::NoSigningKey)?;
        packet[4..SIGNED_OFFSET].copy_from_slice(&hmac);

        Ok(packet)
    }

    /// Validate a signed datagram against local wall time `now` (unix seconds).
    pub fn decode(&self, datagram: &[u8], now: u64) -> Result<Keepalive, WireError> {
        let header = KeepaliveHeader::read_from_prefix(datagram)
            .ok_or(WireError::TooShort(datagram.len()))?;

        let magic = header.magic.get();
        if magic != HEADER_MAGIC {
            return Err(WireError::BadMagic(magic));
        }

        let version = header.version.get();
        if version != HEADER_VERSION {
            return Err(WireError::BadVersion(version));
        }

        let timestamp = u64::from(header.timestamp.get());
        if timestamp > now && timestamp - now > self.slack_secs {
            return Err(WireError::TimestampInFuture(timestamp - now));
        }
        if now > timestamp && now - timestamp > self.slack_secs {
            return Err(WireError::TimestampInPast(now - timestamp));
        }

        if self
            .keys
            .find_match(&datagram[SIGNED_OFFSET..], &header.hmac)
            .is_none()
        {
            return Err(WireError::NoKeyMatched);
        }

        Keepalive::parse(&datagram[HEADER_SIZE..], self.default_timeout)
    }
}

/// The codec a listener or sender speaks.
#[derive(Debug, Clone)]
pub enum Codec {
    Simple(SimpleCodec),
    Signed(SignedCodec),
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Simple(_) => "simple",
            Codec::Signed(_) => "signed",
        }
    }

    pub fn decode(&self, datagram: &[u8], now: u64) -> Result<Keepalive, WireError> {
        match self {
            Codec::Simple(c) => c.decode(datagram),
            Codec::Signed(c) => c.decode(datagram, now),
        }
    }

    pub fn encode(&self, keepalive: &Keepalive, now: u64) -> Result<Vec<u8>, WireError> {
        match self {
            Codec::Simple(c) => Ok(c.encode(keepalive)),
            // The header holds 32 bits of unix time.
            Codec::Signed(c) => c.encode(keepalive, now as u32),
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
