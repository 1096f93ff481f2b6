//! EMP Store - Durable storage for gossip objects.
//!
//! Provides the content-addressed object store backing the protocol
//! engine: four durable tables (pubkeys, purge tokens, messages,
//! publications) plus an in-memory hash-type index that answers
//! "do I have this?" in O(1) and routes object requests.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod store;

pub use config::StoreConfig;
pub use store::{ObjectKind, ObjectStore};

use thiserror::Error;

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database is not open
    #[error("object store is not open")]
    Uninitialized,

    /// Backend failure
    #[error("database error: {0}")]
    Database(String),

    /// A stored row failed to decode
    #[error("corrupt row: {0}")]
    CorruptRow(#[from] emp_core::DecodeError),
}
