//! Result classification
//!
//! Derives the caller-visible outcome as a pure function of the raw outcome.

pub mod classifier;
