/// Submission pipeline: validate, run under the governor, classify.
///
/// `Sandbox` is the single entry point the HTTP layer and the CLI use. It
/// owns the shared read-only policy and the execution backend, and records
/// every step in the metrics registry and the audit log.
use crate::config::descriptor::PolicyDescriptor;
use crate::config::loader::GovernorConfig;
use crate::config::types::{CodeSubmission, ExecutionOutcome, RawOutcome, Result};
use crate::core::governor::{ExecutionBackend, ThreadGovernor};
use crate::core::supervisor::ProcessGovernor;
use crate::core::types::BackendKind;
use crate::exec::validator::validate;
use crate::observability::audit::{CorrelationIds, SecurityEvent, SecurityEventType, SecurityLogger};
use crate::observability::metrics::{GaugeGuard, MetricsRegistry};
use crate::verdict::classifier::ResultClassifier;
use std::sync::Arc;
use std::time::Instant;

/// Build the backend a governor config names
pub fn build_backend(config: &GovernorConfig) -> Result<Arc<dyn ExecutionBackend>> {
    match config.backend {
        BackendKind::Thread => Ok(Arc::new(ThreadGovernor::new())),
        BackendKind::Process => {
            let governor = match &config.worker_executable {
                Some(path) => ProcessGovernor::new(
                    path.clone(),
                    config.kill_grace(),
                    config.address_space_headroom_bytes,
                ),
                None => ProcessGovernor::from_current_exe(
                    config.kill_grace(),
                    config.address_space_headroom_bytes,
                )?,
            };
            Ok(Arc::new(governor))
        }
    }
}

pub struct Sandbox {
    policy: Arc<PolicyDescriptor>,
    backend: Arc<dyn ExecutionBackend>,
    metrics: Arc<MetricsRegistry>,
    audit: Arc<SecurityLogger>,
}

impl Sandbox {
    /// A pipeline with its own metrics registry and log-only auditing
    pub fn new(policy: PolicyDescriptor, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            policy: Arc::new(policy),
            backend,
            metrics: Arc::new(MetricsRegistry::new()),
            audit: Arc::new(SecurityLogger::log_only()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_audit(mut self, audit: Arc<SecurityLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn policy(&self) -> &Arc<PolicyDescriptor> {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run one submission end to end.
    ///
    /// `Ok` carries every outcome the submission can cause, `Blocked`
    /// included. `Err` means the host failed and nothing about the
    /// submission can be reported.
    pub fn submit(&self, submission: CodeSubmission) -> Result<ExecutionOutcome> {
        self.metrics.submissions_total.inc();
        let ids = CorrelationIds::new(submission.id.as_str());

        let validated = match validate(submission, &self.policy) {
            Ok(validated) => validated,
            Err(reason) => {
                self.audit.log_security_event(
                    &SecurityEvent::new(SecurityEventType::SubmissionBlocked, reason.to_string())
                        .with_correlation(&ids),
                );
                let outcome = ResultClassifier::blocked(&reason);
                self.metrics.record_outcome(outcome.kind);
                return Ok(outcome);
            }
        };

        self.metrics.runtime_invocations.inc();
        self.audit.log_security_event(
            &SecurityEvent::new(
                SecurityEventType::ExecutionStart,
                format!("{} bytes of source", validated.source().len()),
            )
            .with_correlation(&ids)
            .with_backend(self.backend.name()),
        );

        let started = Instant::now();
        let raw = {
            let _active = GaugeGuard::new(&self.metrics.active_executions);
            self.backend.execute(&validated, &self.policy)
        };
        let elapsed = started.elapsed();
        self.metrics.execution_duration.observe(elapsed);
        let elapsed_ms = elapsed.as_millis() as u64;

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                self.metrics.service_faults.inc();
                self.audit.log_security_event(
                    &SecurityEvent::new(SecurityEventType::ServiceFault, e.to_string())
                        .with_correlation(&ids)
                        .with_backend(self.backend.name())
                        .with_duration_ms(elapsed_ms),
                );
                return Err(e);
            }
        };

        self.record_limits(&raw, &ids, elapsed_ms);
        let outcome = ResultClassifier::classify(&raw);
        self.metrics.record_outcome(outcome.kind);
        self.audit.log_security_event(
            &SecurityEvent::new(SecurityEventType::ExecutionEnd, outcome.kind.to_string())
                .with_correlation(&ids)
                .with_backend(self.backend.name())
                .with_duration_ms(elapsed_ms),
        );
        Ok(outcome)
    }

    fn record_limits(&self, raw: &RawOutcome, ids: &CorrelationIds, elapsed_ms: u64) {
        let (event_type, details) = match raw {
            RawOutcome::TimedOut => {
                self.metrics.limit_violations_wall.inc();
                (
                    SecurityEventType::WallTimeLimitViolation,
                    format!("wall clock ceiling {}ms reached", self.policy.max_wall_clock_millis),
                )
            }
            RawOutcome::MemoryExceeded => {
                self.metrics.limit_violations_memory.inc();
                (
                    SecurityEventType::MemoryLimitViolation,
                    format!("memory ceiling {} bytes reached", self.policy.max_memory_bytes),
                )
            }
            RawOutcome::Completed(captured) if captured.is_truncated() => {
                self.metrics.limit_violations_output.inc();
                (
                    SecurityEventType::OutputLimitViolation,
                    format!(
                        "output cut at {} bytes, {} dropped",
                        self.policy.max_output_bytes, captured.dropped_bytes
                    ),
                )
            }
            RawOutcome::Completed(_) | RawOutcome::Faulted(_) => return,
        };
        self.audit.log_security_event(
            &SecurityEvent::new(event_type, details)
                .with_correlation(ids)
                .with_backend(self.backend.name())
                .with_duration_ms(elapsed_ms),
        );
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .finish()
    }
}
