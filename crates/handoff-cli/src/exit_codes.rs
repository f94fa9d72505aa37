//! Process exit codes for `handoff` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed, was declined, or finished with step failures.
pub const FAILURE: i32 = 1;
/// Interrupted by Ctrl-C (128 + SIGINT).
pub const INTERRUPTED: i32 = 130;
