//! Utilities
//!
//! Bounded output collection shared by both execution backends.

pub mod output;
