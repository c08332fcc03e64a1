/// Core types shared by the learnbox pipeline
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One learner submission. Created per request, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSubmission {
    /// Opaque id used to correlate logs and audit events
    pub id: String,
    /// Raw source text as received
    pub source: String,
}

impl CodeSubmission {
    /// Wrap source text with a fresh random id
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

/// Closed set of result kinds a caller can observe
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "blocked")]
    Blocked,
    #[serde(rename = "runtime_fault")]
    RuntimeFault,
    #[serde(rename = "resource_exceeded")]
    ResourceExceeded,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 4] = [
        OutcomeKind::Success,
        OutcomeKind::Blocked,
        OutcomeKind::RuntimeFault,
        OutcomeKind::ResourceExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Blocked => "blocked",
            OutcomeKind::RuntimeFault => "runtime_fault",
            OutcomeKind::ResourceExceeded => "resource_exceeded",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of one submission, returned to the caller and then dropped
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub kind: OutcomeKind,
    /// Captured output (trimmed, possibly truncated) or the success marker
    pub output_text: String,
    /// One-line explanation, present for every non-success kind
    pub diagnostic: Option<String>,
    /// Whether the output buffer hit its cap
    pub truncated: bool,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

/// Output integrity classification, carried with every captured buffer
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputIntegrity {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_limit")]
    TruncatedByLimit,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
        }
    }
}

/// What the output capture held when a run completed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Untrimmed buffer content, never longer than the configured cap
    pub text: String,
    pub integrity: OutputIntegrity,
    /// Bytes offered by the program after the cap was reached
    #[serde(default)]
    pub dropped_bytes: u64,
}

impl CapturedOutput {
    pub fn is_truncated(&self) -> bool {
        self.integrity == OutputIntegrity::TruncatedByLimit
    }
}

/// Error categories raised by the interpreter, named the way learners know them
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FaultKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    IndexError,
    ZeroDivisionError,
    OverflowError,
    RecursionError,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::SyntaxError => "SyntaxError",
            FaultKind::NameError => "NameError",
            FaultKind::TypeError => "TypeError",
            FaultKind::ValueError => "ValueError",
            FaultKind::IndexError => "IndexError",
            FaultKind::ZeroDivisionError => "ZeroDivisionError",
            FaultKind::OverflowError => "OverflowError",
            FaultKind::RecursionError => "RecursionError",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault raised by submitted code. This is a result, not a host error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultDiagnostic {
    pub kind: FaultKind,
    pub message: String,
    /// 1-based source line, when known
    pub line: Option<usize>,
}

impl FaultDiagnostic {
    pub fn new(kind: FaultKind, message: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            kind,
            message: message.into(),
            line,
        }
    }

    pub fn at(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for FaultDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Unclassified result of running a validated submission.
///
/// There is no blocked variant: only the static validator can
/// block a submission, and it does so before anything runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RawOutcome {
    Completed(CapturedOutput),
    Faulted(FaultDiagnostic),
    TimedOut,
    MemoryExceeded,
}

/// Resource ceilings handed to the governor for one run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    pub wall_clock: Duration,
    pub memory_bytes: u64,
    pub output_bytes: usize,
}

/// Host-side failures. Submission faults never surface as these.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Lesson store error: {0}")]
    Lessons(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<nix::errno::Errno> for ServiceError {
    fn from(err: nix::errno::Errno) -> Self {
        ServiceError::Worker(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Protocol(err.to_string())
    }
}
