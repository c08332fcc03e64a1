//! The restricted interpreter a validated submission runs in

pub mod builtins;
pub mod heap;
pub mod interpreter;
pub mod value;
