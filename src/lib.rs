//! learnbox: a constrained execution service for learner code snippets
//!
//! Submissions are written in a small Python-like lesson dialect. They are
//! screened by a static validator, run by an interpreter whose only
//! capabilities are the operations a policy grants, and bounded in time,
//! memory and output by a resource governor.
//!
//! # Architecture
//!
//! ## Policy & Configuration ([`config`])
//! - [`config::descriptor`]: the `PolicyDescriptor` every run is checked against
//! - [`config::presets`]: versioned named policies
//! - [`config::loader`]: JSON file plus `LEARNBOX_*` environment overrides
//! - [`config::validator`]: startup validation with errors and warnings
//! - [`config::types`]: shared data types and the `ServiceError` taxonomy
//!
//! ## Script Front End ([`script`])
//! - [`script::lexer`]: tokens shared by the validator and the parser
//! - [`script::parser`]: recursive-descent parser with a nesting bound
//!
//! ## Execution ([`exec`], [`runtime`], [`core`])
//! - [`exec::validator`]: static pre-filter producing `ValidatedSubmission`
//! - [`exec::executor`]: the `Sandbox` pipeline (validate, run, classify)
//! - [`runtime::interpreter`]: capability-restricted tree-walking interpreter
//! - [`runtime::heap`]: memory accounting for runtime values
//! - [`core::governor`]: thread backend and the `ExecutionBackend` seam
//! - [`core::supervisor`]: process backend re-executing a worker under rlimits
//! - [`core::proxy`]: the worker side of the process backend
//!
//! ## Results ([`verdict`])
//! - [`verdict::classifier`]: raw outcome to `ExecutionOutcome`
//!
//! ## Service Surface ([`http`], [`lessons`], [`cli`])
//! - [`http::router`]: `/api/run`, `/api/lessons`, health and metrics routes
//! - [`http::server`]: blocking thread-per-connection listener
//! - [`lessons::store`]: bundled or file-backed localized lesson table
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured audit events with correlation ids
//! - [`observability::metrics`]: Prometheus metrics export

// Kernel Primitives
pub mod kernel;

// Policy & Configuration
pub mod config;

// Script Front End
pub mod script;

// Execution
pub mod core;
pub mod exec;
pub mod runtime;

// Results
pub mod verdict;

// Service Surface
pub mod cli;
pub mod http;
pub mod lessons;

// Observability
pub mod observability;

// Utilities
pub mod utils;

pub use config::types::*;
pub use exec::executor::Sandbox;
