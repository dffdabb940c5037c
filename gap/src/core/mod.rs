//! Deterministic, pure logic shared by the gate engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod acl;
pub mod graph;
pub mod markdown;
pub mod resolve;
pub mod trace;
pub mod types;
