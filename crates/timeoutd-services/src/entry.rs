//! A tracked key and its place in expiration order.

use std::sync::Arc;

use tokio::time::Instant;

/// A key being watched for silence.
///
/// The key never changes. `expires_at` and `last_address` are rewritten on
/// every renewal, but only by `EntryIndex`, which keeps the timeout order
/// consistent while doing so.
#[derive(Debug, Clone)]
pub struct Entry {
    key: Arc<str>,
    expires_at: Instant,
    last_address: String,
}

impl Entry {
    pub fn new(key: impl Into<Arc<str>>, expires_at: Instant, address: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            expires_at,
            last_address: address.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Source address of the most recent keepalive.
    pub fn last_address(&self) -> &str {
        &self.last_address
    }

    /// Position of this entry in the timeout order.
    pub fn timeout_key(&self) -> TimeoutKey {
        TimeoutKey {
            expires_at: self.expires_at,
            key: self.key.clone(),
        }
    }

    pub(crate) fn shared_key(&self) -> &Arc<str> {
        &self.key
    }

    pub(crate) fn refresh(&mut self, expires_at: Instant, address: &str) {
        self.expires_at = expires_at;
        self.last_address.clear();
        self.last_address.push_str(address);
    }
}

/// Sort key for the by-timeout index: expiration first, key second.
///
/// Keys are unique, so two entries never compare equal even when they
/// expire at the same instant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeoutKey {
    pub expires_at: Instant,
    pub key: Arc<str>,
}
