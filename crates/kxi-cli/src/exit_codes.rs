//! Process exit codes
//!
//! A user declining a prompt is not a failure and exits with [`SUCCESS`].

/// Success, or a gate the user declined
pub const SUCCESS: i32 = 0;

/// Any failure: validation, backend error, version gate, abort
pub const ERROR: i32 = 1;
