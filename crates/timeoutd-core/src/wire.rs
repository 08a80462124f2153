//! timeoutd wire format — the on-wire layout of keepalive datagrams.
//!
//! Two variants share one payload grammar:
//!
//!   simple  (port 2952): `key` or `key:timeoutSeconds`, nothing else
//!   signed  (port 2953): 40-byte KeepaliveHeader followed by the payload
//!
//! The header layout is part of the protocol. Every multi-byte field is in
//! network byte order and the HMAC covers everything from the timestamp to
//! the end of the datagram. Changing anything here breaks every deployed
//! sender.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Header ────────────────────────────────────────────────────────────────────

/// Fixed header of a signed keepalive datagram.
///
/// Wire size: 40 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct KeepaliveHeader {
    /// Protocol sentinel. Always HEADER_MAGIC.
    pub magic: U16<NetworkEndian>,

    /// Header version. Receivers drop anything but HEADER_VERSION.
    pub version: U16<NetworkEndian>,

    /// Raw HMAC-SHA256 over bytes [SIGNED_OFFSET..] of the datagram.
    pub hmac: [u8; HMAC_SIZE],

    /// Unix time in seconds when the sender built the packet.
    pub timestamp: U32<NetworkEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(KeepaliveHeader, [u8; 40]);

impl KeepaliveHeader {
    /// A header with the current magic/version and a zeroed HMAC.
    pub fn unsigned(timestamp: u32) -> Self {
        Self {
            magic: U16::new(HEADER_MAGIC),
            version: U16::new(HEADER_VERSION),
            hmac: [0u8; HMAC_SIZE],
            timestamp: U32::new(timestamp),
        }
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// UDP port for the unauthenticated protocol.
pub const SIMPLE_PORT: u16 = 2952;

/// UDP port for the HMAC-signed protocol.
pub const SIGNED_PORT: u16 = 2953;

pub const HEADER_MAGIC: u16 = 0xb049;

pub const HEADER_VERSION: u16 = 0x0001;

/// HMAC-SHA256 output size.
pub const HMAC_SIZE: usize = 32;

pub const HEADER_SIZE: usize = std::mem::size_of::<KeepaliveHeader>();

/// Byte offset where HMAC coverage starts (the timestamp field).
pub const SIGNED_OFFSET: usize = 2 + 2 + HMAC_SIZE;

/// Largest datagram a listener reads.
pub const RECV_BUFFER_SIZE: usize = 2047;

/// Timeout applied when a payload carries no usable `:timeout` suffix.
pub const DEFAULT_TIMEOUT_SECS: i32 = 30;

/// Allowed distance between a packet's timestamp and local wall time.
pub const TIMESTAMP_SLACK_SECS: u64 = 30;

/// IPv4 group used for multicast announcements.
pub const MULTICAST_GROUP: &str = "239.42.173.94";

// ── Payload ───────────────────────────────────────────────────────────────────

/// A decoded keepalive: which key to renew and for how long.
///
/// A non-positive `timeout_secs` asks the receiver to stop tracking the key
/// without notifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    pub key: String,
    pub timeout_secs: i32,
}

impl Keepalive {
    pub fn new(key: impl Into<String>, timeout_secs: i32) -> Self {
        Self {
            key: key.into(),
            timeout_secs,
        }
    }

    /// Parse a payload of the form `key` or `key:timeout`.
    ///
    /// The charset is checked first. A timeout that is missing, empty, or
    /// not a decimal integer falls back to `default_timeout`.
    pub fn parse(payload: &[u8], default_timeout: i32) -> Result<Self, WireError> {
        let text = check_charset(payload)?;

        let (key, timeout_secs) = match text.split_once(':') {
            Some((key, timeout)) => (key, timeout.parse().unwrap_or(default_timeout)),
            None => (text, default_timeout),
        };

        Ok(Self::new(key, timeout_secs))
    }

    /// Serialize as `key:timeout`. Senders always include the timeout.
    pub fn to_payload(&self) -> String {
        format!("{}:{}", self.key, self.timeout_secs)
    }
}

/// Payload bytes must be ASCII alphanumerics, `.` or `:`.
///
/// Returns the payload as a str on success so callers don't re-validate.
pub fn check_charset(payload: &[u8]) -> Result<&str, WireError> {
    if let Some(position) = payload
        .iter()
        .position(|&b| !(b.is_ascii_alphanumeric() || b == b'.' || b == b':'))
    {
        return Err(WireError::InvalidCharacter { position });
    }

    // Every byte is ASCII at this point.
    std::str::from_utf8(payload).map_err(|e| WireError::InvalidCharacter {
        position: e.valid_up_to(),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons a datagram is dropped. None of these are fatal to a listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("packet of {0} bytes is shorter than the {}-byte header", HEADER_SIZE)]
    TooShort(usize),

    #[error("invalid magic 0x{0:04x}")]
    BadMagic(u16),

    #[error("invalid version 0x{0:04x}")]
    BadVersion(u16),

    #[error("timestamp {0}s too far in the future")]
    TimestampInFuture(u64),

    #[error("timestamp {0}s too far in the past")]
    TimestampInPast(u64),

    #[error("did not match any known pre-shared key")]
    NoKeyMatched,

    #[error("invalid ASCII in packet at position {position}")]
    InvalidCharacter { position: usize },

    #[error("no pre-shared key configured for signing")]
    NoSigningKey,
}

impl WireError {
    /// Authentication failures are logged louder than malformed packets.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, WireError::NoKeyMatched)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
