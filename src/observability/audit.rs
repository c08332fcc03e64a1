/// Security audit events for the execution pipeline.
///
/// Every event goes to the `log` facade at a level derived from its severity.
/// When an audit file is configured the event is also appended to it as one
/// JSON line, carrying the submission and run ids for correlation.
use crate::config::types::{Result, ServiceError};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEventType {
    SubmissionBlocked,
    ExecutionStart,
    ExecutionEnd,
    WallTimeLimitViolation,
    MemoryLimitViolation,
    OutputLimitViolation,
    ServiceFault,
    ConfigurationViolation,
}

impl SecurityEventType {
    pub fn default_severity(&self) -> SecuritySeverity {
        match self {
            SecurityEventType::ExecutionStart | SecurityEventType::ExecutionEnd => {
                SecuritySeverity::Low
            }
            SecurityEventType::SubmissionBlocked | SecurityEventType::OutputLimitViolation => {
                SecuritySeverity::Medium
            }
            SecurityEventType::WallTimeLimitViolation
            | SecurityEventType::MemoryLimitViolation
            | SecurityEventType::ConfigurationViolation => SecuritySeverity::High,
            SecurityEventType::ServiceFault => SecuritySeverity::Critical,
        }
    }
}

/// Ids tying every event of one submission together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub submission_id: String,
    /// Fresh for each pass through the pipeline
    pub run_id: String,
}

impl CorrelationIds {
    pub fn new(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            run_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub timestamp: u64,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationIds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            details: details.into(),
            correlation: None,
            backend: None,
            duration_ms: None,
        }
    }

    pub fn with_correlation(mut self, correlation: &CorrelationIds) -> Self {
        self.correlation = Some(correlation.clone());
        self
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }

    pub fn with_duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn with_severity(mut self, severity: SecuritySeverity) -> Self {
        self.severity = severity;
        self
    }
}

/// Log sink plus optional append-only JSONL audit file
pub struct SecurityLogger {
    audit_file: Option<Mutex<File>>,
    audit_path: Option<PathBuf>,
}

impl SecurityLogger {
    /// Events go to `log` only
    pub fn log_only() -> Self {
        Self {
            audit_file: None,
            audit_path: None,
        }
    }

    pub fn with_file(audit_path: impl Into<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.into();
        if let Some(parent) = audit_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| ServiceError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Some(Mutex::new(file)),
            audit_path: Some(audit_path),
        })
    }

    pub fn from_config(audit_path: Option<&Path>) -> Result<Self> {
        match audit_path {
            Some(path) => Self::with_file(path),
            None => Ok(Self::log_only()),
        }
    }

    pub fn audit_path(&self) -> Option<&Path> {
        self.audit_path.as_deref()
    }

    pub fn log_security_event(&self, event: &SecurityEvent) {
        let submission = event
            .correlation
            .as_ref()
            .map(|c| c.submission_id.as_str())
            .unwrap_or("-");
        match event.severity {
            SecuritySeverity::Critical | SecuritySeverity::High => {
                error!("SECURITY {:?} [{}]: {}", event.event_type, submission, event.details)
            }
            SecuritySeverity::Medium => {
                warn!("SECURITY {:?} [{}]: {}", event.event_type, submission, event.details)
            }
            SecuritySeverity::Low => {
                info!("{:?} [{}]: {}", event.event_type, submission, event.details)
            }
        }

        let Some(file) = &self.audit_file else {
            return;
        };
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode audit event: {}", e);
                return;
            }
        };
        match file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit log: {}", e);
                }
            }
            Err(_) => error!("Audit log lock poisoned"),
        }
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::log_only()
    }
}

impl std::fmt::Debug for SecurityLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLogger")
            .field("audit_path", &self.audit_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severities() {
        assert_eq!(
            SecurityEventType::ServiceFault.default_severity(),
            SecuritySeverity::Critical
        );
        assert_eq!(
            SecurityEventType::SubmissionBlocked.default_severity(),
            SecuritySeverity::Medium
        );
        assert_eq!(
            SecurityEventType::ExecutionEnd.default_severity(),
            SecuritySeverity::Low
        );
    }

    #[test]
    fn test_correlation_ids() {
        let a = CorrelationIds::new("sub-1");
        let b = CorrelationIds::new("sub-1");
        assert_eq!(a.submission_id, "sub-1");
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_events_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let logger = SecurityLogger::with_file(&path).unwrap();
        assert_eq!(logger.audit_path(), Some(path.as_path()));

        let ids = CorrelationIds::new("sub-42");
        logger.log_security_event(
            &SecurityEvent::new(SecurityEventType::ExecutionStart, "start").with_correlation(&ids),
        );
        logger.log_security_event(
            &SecurityEvent::new(SecurityEventType::WallTimeLimitViolation, "too slow")
                .with_correlation(&ids)
                .with_backend("thread")
                .with_duration_ms(2000),
        );

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_type"], "ExecutionStart");
        assert_eq!(lines[1]["severity"], "High");
        assert_eq!(lines[1]["correlation"]["submission_id"], "sub-42");
        assert_eq!(lines[1]["correlation"]["run_id"], ids.run_id.as_str());
        assert_eq!(lines[1]["duration_ms"], 2000);
        assert!(lines[0].get("backend").is_none());
    }

    #[test]
    fn test_log_only_has_no_path() {
        let logger = SecurityLogger::from_config(None).unwrap();
        assert!(logger.audit_path().is_none());
        logger.log_security_event(&SecurityEvent::new(SecurityEventType::ServiceFault, "x"));
    }
}
