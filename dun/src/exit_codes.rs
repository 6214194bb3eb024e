//! Stable exit codes for dun CLI commands.

/// Command succeeded; for `dun check`, every check passed.
pub const OK: i32 = 0;
/// Checks were evaluated but some are not passing.
pub const CHECKS_FAILED: i32 = 1;
/// Bad arguments, or a malformed or stale task id.
pub const USAGE: i32 = 2;
/// `.dun/config.toml` is unreadable or invalid, or nothing is configured.
pub const CONFIG: i32 = 3;
/// The check engine could not be run.
pub const ENGINE_FAILED: i32 = 4;
