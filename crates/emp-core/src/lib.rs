//! EMP Core - Core types and primitives for the EMP gossip node.
//!
//! This crate provides:
//! - The 48-byte SHA-384 object hash and the 16-byte transaction id
//! - Big-endian wire encoding traits shared by every payload type
//! - Second-resolution timestamps and clock skew validation

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod encoding;
pub mod hash;
pub mod time;

pub use encoding::{DecodeError, WireDecode, WireEncode};
pub use hash::{sha384, Hash, Txid, HASH_LEN, TXID_LEN};
pub use time::Timestamp;

/// Protocol version advertised in VERSION frames.
///
/// Peers reporting any other value are disconnected.
pub const LOCAL_VERSION: u32 = 1;

/// Maximum clock skew tolerated on a peer's VERSION timestamp (5 minutes).
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Length of the initialization vector carried by an encrypted pubkey.
pub const IV_LEN: usize = 16;

/// Length of a frame header on the wire: opcode, kind, payload length.
pub const FRAME_HEADER_LEN: usize = 6;

/// Default interval between message sweeps (24 hours).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// Default retention for direct messages (14 days).
///
/// Publications, pubkeys, and purge tokens are never swept.
pub const DEFAULT_MSG_RETENTION_SECS: u64 = 14 * 86_400;
