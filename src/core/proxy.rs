//! Worker role and its JSON pipe protocol.
//!
//! The service re-executes its own binary with `--internal-role worker`.
//! The worker restricts itself, reads one [`WorkerRequest`] from stdin, runs
//! it in-process under [`guard`], writes one [`WorkerStatus`] to stdout and
//! exits. It never runs more than one submission.

use crate::config::types::{CodeSubmission, RawOutcome, Result, ServiceError};
use crate::core::governor::guard;
use crate::core::types::{WorkerRequest, WorkerStatus};
use crate::exec::validator::validate;
use crate::kernel::rlimit::{apply_worker_limits, set_no_new_privs, WorkerLimits};
use crate::runtime::interpreter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Largest request a worker will read from its parent
pub const MAX_WORKER_REQUEST_BYTES: u64 = 1024 * 1024;

/// Exit code when the status could not be written back
pub const EXIT_STATUS_WRITE_FAILED: i32 = 3;

pub fn read_json<T: DeserializeOwned, R: Read>(input: R, limit: u64) -> Result<T> {
    let mut data = Vec::new();
    input.take(limit + 1).read_to_end(&mut data)?;
    if data.len() as u64 > limit {
        return Err(ServiceError::Protocol(format!(
            "message exceeds {} bytes",
            limit
        )));
    }
    serde_json::from_slice(&data)
        .map_err(|e| ServiceError::Protocol(format!("failed to decode json: {}", e)))
}

pub fn write_json<T: Serialize, W: Write>(mut output: W, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| ServiceError::Protocol(format!("failed to encode json: {}", e)))?;
    output.write_all(&payload)?;
    output.flush()?;
    Ok(())
}

/// Entry point of the worker role. Returns the process exit code.
pub fn worker_main() -> i32 {
    let status = match serve_request(io::stdin().lock()) {
        Ok(outcome) => WorkerStatus::finished(outcome),
        Err(e) => WorkerStatus::failed(e.to_string()),
    };

    match write_json(io::stdout().lock(), &status) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("learnbox worker: failed to report status: {}", e);
            EXIT_STATUS_WRITE_FAILED
        }
    }
}

fn serve_request<R: Read>(input: R) -> Result<RawOutcome> {
    set_no_new_privs()?;
    let request: WorkerRequest = read_json(input, MAX_WORKER_REQUEST_BYTES)?;

    let limits = WorkerLimits::for_run(
        request.policy.max_memory_bytes,
        request.policy.wall_clock(),
        request.address_space_headroom,
    );
    apply_worker_limits(&limits)?;

    execute_request(request)
}

/// Validate and run one request in this process
pub fn execute_request(request: WorkerRequest) -> Result<RawOutcome> {
    let submission = CodeSubmission::with_id(request.submission_id, request.source);
    let policy = Arc::new(request.policy);

    // The parent validated already; a mismatch means the two disagree on policy.
    let validated = validate(submission, &policy).map_err(|reason| {
        ServiceError::Worker(format!("worker rejected submission: {}", reason.code()))
    })?;

    let run_policy = Arc::clone(&policy);
    guard(
        move |budget| interpreter::run(&validated, &run_policy, budget),
        policy.limits(),
    )
}
