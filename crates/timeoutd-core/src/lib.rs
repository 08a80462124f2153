//! timeoutd-core — wire format, packet authentication, and configuration.
//! The scheduler and the daemon both depend on this crate.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod wire;

pub use codec::{Codec, SignedCodec, SimpleCodec};
pub use wire::{Keepalive, WireError};
