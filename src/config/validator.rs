// Startup configuration validation.
//
// Every check runs and is collected; any error fails startup with the full
// list, warnings are only logged.

use crate::config::descriptor::PolicyDescriptor;
use crate::config::loader::ServiceConfig;
use crate::config::types::{Result, ServiceError};
use crate::core::types::BackendKind;
use crate::runtime::builtins::Operation;
use std::net::SocketAddr;

/// Wall-clock ceilings above this are allowed but logged
const LONG_WALL_CLOCK_MILLIS: u64 = 30_000;

#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate the whole service configuration, failing on any error
pub fn validate_config(config: &ServiceConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    match config.effective_policy() {
        Ok(policy) => validate_policy(&policy, &mut result),
        Err(e) => result.add_error(e.to_string()),
    }
    validate_server(config, &mut result);
    validate_governor(config, &mut result);
    validate_paths(config, &mut result);

    if !result.is_valid() {
        return Err(ServiceError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }
    Ok(result)
}

/// Policy checks shared by the service config and the worker handshake
pub fn validate_policy(policy: &PolicyDescriptor, result: &mut ValidationResult) {
    if policy.allowed_operations.is_empty() {
        result.add_warning("allowed_operations is empty; no submission can print".to_string());
    }
    for name in &policy.allowed_operations {
        if Operation::from_name(name).is_none() {
            result.add_error(format!("allowed operation '{}' is not implemented", name));
        }
        if policy.forbids(name) {
            result.add_error(format!(
                "operation '{}' is both allowed and forbidden",
                name
            ));
        }
    }

    if policy.max_source_bytes == 0 {
        result.add_error("max_source_bytes cannot be zero".to_string());
    }
    if policy.max_output_bytes == 0 {
        result.add_error("max_output_bytes cannot be zero".to_string());
    }
    if policy.max_wall_clock_millis == 0 {
        result.add_error("max_wall_clock_millis cannot be zero".to_string());
    } else if policy.max_wall_clock_millis > LONG_WALL_CLOCK_MILLIS {
        result.add_warning(format!(
            "max_wall_clock_millis {} is unusually long for a lesson snippet",
            policy.max_wall_clock_millis
        ));
    }
    if policy.max_memory_bytes == 0 {
        result.add_error("max_memory_bytes cannot be zero".to_string());
    } else if policy.max_memory_bytes < 1024 * 1024 {
        result.add_warning(format!(
            "max_memory_bytes {} is very low (< 1MB)",
            policy.max_memory_bytes
        ));
    }
}

fn validate_server(config: &ServiceConfig, result: &mut ValidationResult) {
    let server = &config.server;
    if server.bind.parse::<SocketAddr>().is_err() {
        result.add_error(format!(
            "server.bind '{}' is not a socket address (host:port)",
            server.bind
        ));
    }
    if server.max_request_bytes == 0 {
        result.add_error("server.max_request_bytes cannot be zero".to_string());
    }
    if server.read_timeout_millis == 0 {
        result.add_error("server.read_timeout_millis cannot be zero".to_string());
    }
    if let Ok(policy) = config.effective_policy() {
        // JSON escaping can only grow the source, so the body must fit it at least once.
        if server.max_request_bytes < policy.max_source_bytes {
            result.add_warning(format!(
                "server.max_request_bytes {} is below max_source_bytes {}; large submissions get 413",
                server.max_request_bytes, policy.max_source_bytes
            ));
        }
    }
}

fn validate_governor(config: &ServiceConfig, result: &mut ValidationResult) {
    let governor = &config.governor;
    if governor.backend == BackendKind::Thread {
        result.add_warning(
            "thread backend enforces memory by heap accounting only; prefer process".to_string(),
        );
    }
    if governor.backend == BackendKind::Process && governor.kill_grace_millis == 0 {
        result.add_warning("governor.kill_grace_millis is zero".to_string());
    }
    if let Some(worker) = &governor.worker_executable {
        if !worker.is_file() {
            result.add_error(format!(
                "governor.worker_executable does not exist: {}",
                worker.display()
            ));
        }
    }
}

fn validate_paths(config: &ServiceConfig, result: &mut ValidationResult) {
    if let Some(lessons) = &config.lessons_path {
        if !lessons.is_file() {
            result.add_error(format!("lessons_path does not exist: {}", lessons.display()));
        }
    }
    if let Some(audit) = &config.audit_log_path {
        let parent = audit.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            if !parent.exists() {
                result.add_warning(format!(
                    "audit log directory {} will be created",
                    parent.display()
                ));
            }
        }
    }
}
