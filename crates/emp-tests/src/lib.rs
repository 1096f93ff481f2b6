//! Test harness for multi-node EMP integration testing.

#![deny(unsafe_code)]

pub mod harness;
pub mod node;

pub use harness::{wait_for, TestNetwork};
pub use node::TestEngine;
