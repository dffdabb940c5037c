//! Stable exit codes for gap CLI commands.

/// Command succeeded, the request was permitted, or the checkpoint may proceed.
pub const OK: i32 = 0;
/// Command failed: missing or invalid manifest, missing proposal, persistence or validation errors.
pub const FAILURE: i32 = 1;
/// A checkpoint is blocked or an ACL check denied the request.
pub const BLOCKED: i32 = 1;
