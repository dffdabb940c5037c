//! I/O adapters for gate commands.

pub mod acl_store;
pub mod atomic;
pub mod config;
pub mod lock;
pub mod manifest_store;
pub mod paths;
pub mod sql_records;
pub mod yaml_records;
