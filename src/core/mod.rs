//! Execution governance.
//!
//! The governor owns the per-run budget and the backend seam; the supervisor
//! runs submissions in worker processes and the proxy is the worker side of
//! that pipe.

pub mod governor;
pub mod proxy;
pub mod supervisor;
pub mod types;
