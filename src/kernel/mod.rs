//! Thin wrappers around process-level kernel primitives.
//!
//! All `unsafe` code is concentrated here.

pub mod rlimit;
pub mod signal;
