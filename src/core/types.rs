/// Types exchanged between the service and its execution backends.
use crate::config::descriptor::PolicyDescriptor;
use crate::config::types::RawOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which governor backend runs submissions
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Dedicated thread in the service process
    Thread,
    /// Re-executed worker process under rlimits
    #[default]
    Process,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Thread => "thread",
            BackendKind::Process => "process",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(BackendKind::Thread),
            "process" => Ok(BackendKind::Process),
            other => Err(format!("unknown backend '{}' (expected thread or process)", other)),
        }
    }
}

/// Sent by the service to a worker on stdin
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerRequest {
    pub submission_id: String,
    pub source: String,
    pub policy: PolicyDescriptor,
    /// Added to the heap ceiling to size the worker's address-space rlimit
    pub address_space_headroom: u64,
}

/// Written by a worker on stdout right before it exits
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStatus {
    pub outcome: Option<RawOutcome>,
    /// Host-side failure inside the worker; never caused by submitted code
    pub internal_error: Option<String>,
}

impl WorkerStatus {
    pub fn finished(outcome: RawOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            internal_error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            outcome: None,
            internal_error: Some(message.into()),
        }
    }
}
