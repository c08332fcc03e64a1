//! Resource governor.
//!
//! Every run happens inside a preemptible unit that the governor can abandon:
//! a dedicated thread here, or a worker process in [`crate::core::supervisor`].
//! Both sit behind [`ExecutionBackend`] so the pipeline never knows which one
//! it is using.

use crate::config::descriptor::PolicyDescriptor;
use crate::config::types::{RawOutcome, ResourceLimits, Result, ServiceError};
use crate::exec::validator::ValidatedSubmission;
use crate::runtime::interpreter;
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Stack reserved for the thread that walks the syntax tree
pub const RUN_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Limits handed to the runtime for one run.
///
/// The runtime polls these; it never picks them.
#[derive(Clone, Debug)]
pub struct Budget {
    cancel: Arc<AtomicBool>,
    deadline: Instant,
    memory_bytes: u64,
}

impl Budget {
    pub fn new(limits: &ResourceLimits) -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now() + limits.wall_clock,
            memory_bytes: limits.memory_bytes,
        }
    }

    /// Ask the run to stop at its next check
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn time_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn memory_bytes(&self) -> u64 {
        self.memory_bytes
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }
}

/// A way of running validated submissions under the policy's ceilings.
///
/// `Err` is reserved for host failures. Everything the submission itself
/// causes, including hitting a limit, comes back as a [`RawOutcome`].
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        submission: &ValidatedSubmission,
        policy: &Arc<PolicyDescriptor>,
    ) -> Result<RawOutcome>;
}

/// Run `thunk` on a fresh thread and wait at most `limits.wall_clock` for it.
///
/// On expiry the cancellation flag is raised and `TimedOut` is returned at
/// once. The thread is detached; it observes the flag at its next step,
/// and comparisons count a step per element pair.
pub fn guard<F>(thunk: F, limits: ResourceLimits) -> Result<RawOutcome>
where
    F: FnOnce(Budget) -> RawOutcome + Send + 'static,
{
    let budget = Budget::new(&limits);
    let cancel = budget.cancel_flag();
    let (tx, rx) = crossbeam_channel::bounded(1);

    thread::Builder::new()
        .name("learnbox-run".to_string())
        .stack_size(RUN_STACK_SIZE)
        .spawn(move || {
            let outcome = thunk(budget);
            // The receiver is gone when the governor already gave up.
            let _ = tx.send(outcome);
        })
        .map_err(|e| ServiceError::Worker(format!("failed to spawn run thread: {}", e)))?;

    match rx.recv_timeout(limits.wall_clock) {
        Ok(outcome) => Ok(outcome),
        Err(RecvTimeoutError::Timeout) => {
            cancel.store(true, Ordering::SeqCst);
            log::debug!(
                "run exceeded {}ms, cancellation requested",
                limits.wall_clock.as_millis()
            );
            Ok(RawOutcome::TimedOut)
        }
        Err(RecvTimeoutError::Disconnected) => Err(ServiceError::Worker(
            "run thread exited without reporting an outcome".to_string(),
        )),
    }
}

/// In-process backend: one dedicated thread per run
#[derive(Debug, Default)]
pub struct ThreadGovernor;

impl ThreadGovernor {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionBackend for ThreadGovernor {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn execute(
        &self,
        submission: &ValidatedSubmission,
        policy: &Arc<PolicyDescriptor>,
    ) -> Result<RawOutcome> {
        let submission = submission.clone();
        let run_policy = Arc::clone(policy);
        guard(
            move |budget| interpreter::run(&submission, &run_policy, budget),
            policy.limits(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{CapturedOutput, CodeSubmission, OutputIntegrity};
    use crate::exec::validator::validate;

    fn limits(millis: u64) -> ResourceLimits {
        ResourceLimits {
            wall_clock: Duration::from_millis(millis),
            memory_bytes: 1 << 20,
            output_bytes: 1024,
        }
    }

    #[test]
    fn test_budget_reports_limits() {
        let budget = Budget::new(&limits(10_000));
        assert!(!budget.is_cancelled());
        assert!(!budget.deadline_passed());
        assert_eq!(budget.memory_bytes(), 1 << 20);
        budget.cancel();
        assert!(budget.is_cancelled());

        let expired = Budget::new(&limits(0));
        assert!(expired.deadline_passed());
        assert_eq!(expired.time_left(), Duration::ZERO);
    }

    #[test]
    fn test_guard_returns_thunk_outcome() {
        let outcome = guard(
            |_| {
                RawOutcome::Completed(CapturedOutput {
                    text: "done".to_string(),
                    integrity: OutputIntegrity::Complete,
                    dropped_bytes: 0,
                })
            },
            limits(1_000),
        )
        .unwrap();
        assert!(matches!(outcome, RawOutcome::Completed(ref c) if c.text == "done"));
    }

    #[test]
    fn test_guard_cancels_on_timeout() {
        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);
        let started = Instant::now();
        let outcome = guard(
            move |budget| {
                while !budget.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                let _ = seen_tx.send(());
                RawOutcome::Completed(CapturedOutput {
                    text: String::new(),
                    integrity: OutputIntegrity::Complete,
                    dropped_bytes: 0,
                })
            },
            limits(50),
        )
        .unwrap();
        assert_eq!(outcome, RawOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
        // The abandoned thread sees the flag and winds down.
        assert!(seen_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_abandoned_comparison_winds_down() {
        let policy = Arc::new(PolicyDescriptor::default());
        let source = "a = [0]\nb = [0]\nfor i in range(40):\n    a = [a, a]\n    b = [b, b]\nprint(a == b)";
        let submission = validate(CodeSubmission::new(source), &policy).unwrap();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let outcome = guard(
            move |budget| {
                let outcome = interpreter::run(&submission, &policy, budget);
                let _ = done_tx.send(outcome.clone());
                outcome
            },
            limits(100),
        )
        .unwrap();
        assert_eq!(outcome, RawOutcome::TimedOut);
        let finished = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("run thread kept comparing after cancellation");
        assert_eq!(finished, RawOutcome::TimedOut);
    }

    #[test]
    fn test_guard_reports_vanished_thread() {
        let result = guard(|_| panic!("boom"), limits(1_000));
        assert!(matches!(result, Err(ServiceError::Worker(_))));
    }

    #[test]
    fn test_thread_governor_runs_and_times_out() {
        let policy = Arc::new(PolicyDescriptor {
            max_wall_clock_millis: 100,
            ..Default::default()
        });
        let backend = ThreadGovernor::new();
        assert_eq!(backend.name(), "thread");

        let ok = validate(CodeSubmission::new("print(6 * 7)"), &policy).unwrap();
        match backend.execute(&ok, &policy).unwrap() {
            RawOutcome::Completed(captured) => assert_eq!(captured.text, "42\n"),
            other => panic!("unexpected outcome {:?}", other),
        }

        let spin = validate(CodeSubmission::new("while True: pass"), &policy).unwrap();
        assert_eq!(backend.execute(&spin, &policy).unwrap(), RawOutcome::TimedOut);
    }
}
