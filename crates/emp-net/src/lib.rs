//! EMP Network - Framed TCP transport.
//!
//! Moves whole frames between peers, in order per peer, and exposes the
//! three primitives the engine relies on: peer-add (dial), peer-kill
//! (shun), and send (unicast or broadcast fan-out excluding the
//! source). Payloads stay opaque; all authenticity lives at the object
//! layer.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod connection;
pub mod transport;

pub use connection::{ConnCmd, PeerHandle};
pub use transport::{PeerCommand, Transport, TransportConfig, TransportError};
