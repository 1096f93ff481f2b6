//! EMP Protocol - Wire protocol and payload definitions.
//!
//! This crate defines:
//! - The ten-opcode frame header and frame kinds
//! - Gossip object payloads (pubkeys, messages, publications, purges)
//! - Peer discovery payloads (Version, NodeList)
//! - Bit-exact big-endian codecs for all of the above

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod frame;
pub mod objects;
pub mod peers;

pub use frame::{Frame, FrameKind, Header, Opcode};
pub use objects::{EncryptedPubkey, Message, NilPayload, ObjList, Purge};
pub use peers::{ip_from_wire, ip_to_wire, peer_key, Node, NodeList, Version, NO_ADDRESS};
