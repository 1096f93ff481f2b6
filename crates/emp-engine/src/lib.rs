//! EMP Engine - The protocol engine and node assembly.
//!
//! This crate implements:
//! - The dispatcher and per-opcode handlers driving object gossip
//! - The peer table with backbone admission and eager propagation
//! - The registrar bus notifying local consumers of accepted objects
//! - The message sweeper
//! - `Node`: the explicitly constructed value that owns the store, the
//!   transport, and every queue between them

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod engine;
pub mod node;
pub mod registry;
pub mod sweeper;

pub use engine::{Engine, EngineConfig};
pub use node::{FrameInjector, Node, NodeConfig, NodeError};
pub use registry::{Registry, RegistryReceivers};
pub use sweeper::SweeperConfig;
