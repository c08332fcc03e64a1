//! Process backend: one short-lived worker process per submission.
//!
//! The parent spawns the worker with an empty environment, feeds it the
//! request on stdin, drains stdout and stderr on helper threads and polls
//! `waitpid`. Once the wall-clock ceiling plus a grace period has elapsed the
//! whole worker process group is killed. The exit status is then mapped to a
//! [`RawOutcome`].

use crate::config::descriptor::PolicyDescriptor;
use crate::config::types::{RawOutcome, Result, ServiceError};
use crate::core::governor::ExecutionBackend;
use crate::core::proxy::write_json;
use crate::core::types::{WorkerRequest, WorkerStatus};
use crate::exec::validator::ValidatedSubmission;
use crate::utils::output::collect_stream;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);
pub const DEFAULT_ADDRESS_SPACE_HEADROOM: u64 = 256 * 1024 * 1024;

/// Worker stderr kept for diagnosis
const STDERR_LIMIT: usize = 16 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn to_worker_error(prefix: &str, err: impl std::fmt::Display) -> ServiceError {
    ServiceError::Worker(format!("{}: {}", prefix, err))
}

/// How a worker process ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    Exited(i32),
    Signaled(Signal),
}

#[derive(Debug)]
pub struct ProcessGovernor {
    executable: PathBuf,
    kill_grace: Duration,
    address_space_headroom: u64,
}

impl ProcessGovernor {
    pub fn new(executable: impl Into<PathBuf>, kill_grace: Duration, address_space_headroom: u64) -> Self {
        Self {
            executable: executable.into(),
            kill_grace,
            address_space_headroom,
        }
    }

    /// Workers are this very binary in its worker role
    pub fn from_current_exe(kill_grace: Duration, address_space_headroom: u64) -> Result<Self> {
        let executable = std::env::current_exe()
            .map_err(|e| to_worker_error("cannot locate own executable", e))?;
        Ok(Self::new(executable, kill_grace, address_space_headroom))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn stdout_limit(policy: &PolicyDescriptor) -> usize {
        // Worst case JSON escaping turns one output byte into six.
        policy.max_output_bytes.saturating_mul(6).saturating_add(64 * 1024)
    }
}

impl ExecutionBackend for ProcessGovernor {
    fn name(&self) -> &'static str {
        "process"
    }

    fn execute(
        &self,
        submission: &ValidatedSubmission,
        policy: &Arc<PolicyDescriptor>,
    ) -> Result<RawOutcome> {
        let request = WorkerRequest {
            submission_id: submission.id().to_string(),
            source: submission.source().to_string(),
            policy: (**policy).clone(),
            address_space_headroom: self.address_space_headroom,
        };

        let mut child = Command::new(&self.executable)
            .arg("--internal-role")
            .arg("worker")
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| {
                to_worker_error(&format!("spawn({})", self.executable.display()), e)
            })?;
        let pid = Pid::from_raw(child.id() as i32);

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                terminate_worker_group(pid);
                let _ = waitpid(pid, None);
                return Err(ServiceError::Worker("worker pipes unavailable".to_string()));
            }
        };

        let writer = thread::spawn(move || write_json(stdin, &request));
        let stdout_limit = Self::stdout_limit(policy);
        let stdout_reader = thread::spawn(move || collect_stream(stdout, stdout_limit));
        let stderr_reader = thread::spawn(move || collect_stream(stderr, STDERR_LIMIT));

        let kill_after = policy.wall_clock() + self.kill_grace;
        let started = Instant::now();
        let mut killed = false;

        let exit = loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    if !killed && started.elapsed() >= kill_after {
                        log::warn!(
                            "worker {} for submission {} exceeded {}ms, killing",
                            pid,
                            submission.id(),
                            kill_after.as_millis()
                        );
                        terminate_worker_group(pid);
                        killed = true;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Ok(WaitStatus::Exited(_, code)) => break WorkerExit::Exited(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => break WorkerExit::Signaled(sig),
                Ok(_) => continue,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    terminate_worker_group(pid);
                    return Err(to_worker_error("waitpid(worker)", e));
                }
            }
        };

        if let Ok(Err(e)) = writer.join() {
            // The worker may legitimately exit before reading everything.
            log::debug!("worker request write failed: {}", e);
        }
        let (stdout, _) = stdout_reader
            .join()
            .map_err(|_| ServiceError::Worker("stdout reader panicked".to_string()))?
            .map_err(|e| to_worker_error("read(worker stdout)", e))?;
        let (stderr, _) = stderr_reader
            .join()
            .map_err(|_| ServiceError::Worker("stderr reader panicked".to_string()))?
            .map_err(|e| to_worker_error("read(worker stderr)", e))?;

        log::debug!(
            "worker {} finished as {:?} after {}ms",
            pid,
            exit,
            started.elapsed().as_millis()
        );
        interpret_exit(exit, &stdout, &stderr, killed)
    }
}

fn terminate_worker_group(pid: Pid) {
    if kill(Pid::from_raw(-pid.as_raw()), Signal::SIGKILL).is_err() {
        let _ = kill(pid, Signal::SIGKILL);
    }
}

/// Map a finished worker to an outcome.
///
/// A kill the parent sent, or `SIGXCPU` from the CPU rlimit, is a timeout. An
/// abort after a failed allocation, or a `SIGKILL` nobody here sent (the
/// kernel OOM killer), is a memory overrun. Everything else abnormal is a
/// host failure.
pub fn interpret_exit(
    exit: WorkerExit,
    stdout: &[u8],
    stderr: &[u8],
    killed_by_parent: bool,
) -> Result<RawOutcome> {
    if killed_by_parent {
        return Ok(RawOutcome::TimedOut);
    }

    match exit {
        WorkerExit::Exited(code) => {
            let status: WorkerStatus = serde_json::from_slice(stdout).map_err(|e| {
                ServiceError::Protocol(format!(
                    "worker exited with code {} and unreadable status: {}{}",
                    code,
                    e,
                    stderr_summary(stderr)
                ))
            })?;
            match (status.outcome, status.internal_error) {
                (_, Some(message)) => Err(ServiceError::Worker(message)),
                (Some(outcome), None) => Ok(outcome),
                (None, None) => Err(ServiceError::Protocol(
                    "worker status carried no outcome".to_string(),
                )),
            }
        }
        WorkerExit::Signaled(Signal::SIGXCPU) => Ok(RawOutcome::TimedOut),
        WorkerExit::Signaled(Signal::SIGKILL) => Ok(RawOutcome::MemoryExceeded),
        WorkerExit::Signaled(Signal::SIGABRT) | WorkerExit::Signaled(Signal::SIGSEGV)
            if mentions_allocation_failure(stderr) =>
        {
            Ok(RawOutcome::MemoryExceeded)
        }
        WorkerExit::Signaled(sig) => Err(ServiceError::Worker(format!(
            "worker terminated by {}{}",
            sig,
            stderr_summary(stderr)
        ))),
    }
}

fn mentions_allocation_failure(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_ascii_lowercase();
    text.contains("memory allocation") || text.contains("out of memory")
}

fn stderr_summary(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    match text.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some(line) => format!(" ({})", line.chars().take(200).collect::<String>()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CapturedOutput, OutputIntegrity};

    fn status_bytes(status: &WorkerStatus) -> Vec<u8> {
        serde_json::to_vec(status).unwrap()
    }

    #[test]
    fn test_clean_exit_carries_outcome() {
        let outcome = RawOutcome::Completed(CapturedOutput {
            text: "ok\n".to_string(),
            integrity: OutputIntegrity::Complete,
            dropped_bytes: 0,
        });
        let stdout = status_bytes(&WorkerStatus::finished(outcome.clone()));
        assert_eq!(
            interpret_exit(WorkerExit::Exited(0), &stdout, b"", false).unwrap(),
            outcome
        );
    }

    #[test]
    fn test_internal_error_is_a_host_failure() {
        let stdout = status_bytes(&WorkerStatus::failed("rlimit refused"));
        let err = interpret_exit(WorkerExit::Exited(0), &stdout, b"", false).unwrap_err();
        assert!(matches!(err, ServiceError::Worker(ref m) if m == "rlimit refused"));
    }

    #[test]
    fn test_garbled_status_is_a_protocol_error() {
        let err = interpret_exit(WorkerExit::Exited(1), b"{\"outc", b"boom\n", false).unwrap_err();
        match err {
            ServiceError::Protocol(message) => assert!(message.contains("(boom)")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_parent_kill_is_a_timeout() {
        assert_eq!(
            interpret_exit(WorkerExit::Signaled(Signal::SIGKILL), b"", b"", true).unwrap(),
            RawOutcome::TimedOut
        );
        assert_eq!(
            interpret_exit(WorkerExit::Signaled(Signal::SIGXCPU), b"", b"", false).unwrap(),
            RawOutcome::TimedOut
        );
    }

    #[test]
    fn test_allocation_failure_is_memory_exceeded() {
        let stderr = b"memory allocation of 1073741824 bytes failed\n";
        assert_eq!(
            interpret_exit(WorkerExit::Signaled(Signal::SIGABRT), b"", stderr, false).unwrap(),
            RawOutcome::MemoryExceeded
        );
        assert_eq!(
            interpret_exit(WorkerExit::Signaled(Signal::SIGKILL), b"", b"", false).unwrap(),
            RawOutcome::MemoryExceeded
        );
    }

    #[test]
    fn test_other_crashes_are_host_failures() {
        let err = interpret_exit(WorkerExit::Signaled(Signal::SIGABRT), b"", b"assertion failed", false)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Worker(_)));
        assert!(interpret_exit(WorkerExit::Signaled(Signal::SIGSEGV), b"", b"", false).is_err());
    }

    #[test]
    fn test_missing_executable_fails_to_spawn() {
        let backend = ProcessGovernor::new(
            "/nonexistent/learnbox-worker",
            DEFAULT_KILL_GRACE,
            DEFAULT_ADDRESS_SPACE_HEADROOM,
        );
        let policy = Arc::new(PolicyDescriptor::default());
        let submission = crate::exec::validator::validate(
            crate::config::types::CodeSubmission::new("print(1)"),
            &policy,
        )
        .unwrap();
        let err = backend.execute(&submission, &policy).unwrap_err();
        assert!(matches!(err, ServiceError::Worker(_)));
        assert_eq!(backend.name(), "process");
    }
}
