//! Command implementations for the `fieldrec` binary.
//!
//! Each command opens the configured backend, runs one service call on a
//! current-thread runtime and prints the result as JSON.

pub mod comments;
pub mod context;
pub mod entity;
pub mod maintenance;
pub mod output;
pub mod published;
pub mod review;
pub mod version;
