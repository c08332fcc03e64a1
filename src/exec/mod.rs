//! Execution control
//!
//! The static validator and the validate-run-classify pipeline built on it.

pub mod executor;
pub mod validator;
