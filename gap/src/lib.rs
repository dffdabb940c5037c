//! Gated Agent Protocol engine.
//!
//! Decides which declared workflow steps may proceed, which writes and
//! commands an actor may currently perform, and whether the chain of produced
//! artifacts is consistent. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph validation, status
//!   resolution, ACL evaluation, traceability). No I/O.
//! - **[`io`]**: Side-effecting adapters (project layout, config, manifest
//!   loading, ledger record stores, ACL cache, approval lock).
//!
//! Orchestration modules ([`ledger`], [`gate`], [`checkpoint`], [`migrate`],
//! [`audit`], [`status`]) coordinate core logic with I/O to implement CLI
//! commands.

pub mod audit;
pub mod checkpoint;
pub mod core;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod ledger;
pub mod logging;
pub mod manifest;
pub mod migrate;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
