/// Service configuration loading.
///
/// A JSON file with optional sections; anything left out takes its default.
/// Environment variables are applied on top, and CLI flags on top of those.
use crate::config::descriptor::PolicyDescriptor;
use crate::config::presets::get_presets;
use crate::config::types::{Result, ServiceError};
use crate::core::supervisor::{DEFAULT_ADDRESS_SPACE_HEADROOM, DEFAULT_KILL_GRACE};
use crate::core::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_BIND: &str = "LEARNBOX_BIND";
pub const ENV_BACKEND: &str = "LEARNBOX_BACKEND";
pub const ENV_AUDIT_LOG: &str = "LEARNBOX_AUDIT_LOG";

pub const DEFAULT_BIND: &str = "127.0.0.1:5001";
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const DEFAULT_READ_TIMEOUT_MILLIS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Largest request (head plus body) the server will read
    pub max_request_bytes: usize,
    pub read_timeout_millis: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            read_timeout_millis: DEFAULT_READ_TIMEOUT_MILLIS,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub backend: BackendKind,
    pub kill_grace_millis: u64,
    /// Added on top of the policy memory ceiling for the worker's RLIMIT_AS
    pub address_space_headroom_bytes: u64,
    /// Worker binary; the running executable when unset
    pub worker_executable: Option<PathBuf>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            kill_grace_millis: DEFAULT_KILL_GRACE.as_millis() as u64,
            address_space_headroom_bytes: DEFAULT_ADDRESS_SPACE_HEADROOM,
            worker_executable: None,
        }
    }
}

impl GovernorConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    /// Named policy from the preset registry. Mutually exclusive with `policy`.
    pub preset: Option<String>,
    pub policy: Option<PolicyDescriptor>,
    pub governor: GovernorConfig,
    /// Lesson table replacing the bundled one
    pub lessons_path: Option<PathBuf>,
    /// JSONL audit file; events only go to the log when unset
    pub audit_log_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| ServiceError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// File when given, defaults otherwise, then process environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `LEARNBOX_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind.trim().to_string();
        }
        if let Some(backend) = lookup(ENV_BACKEND).filter(|v| !v.trim().is_empty()) {
            self.governor.backend = backend
                .parse()
                .map_err(|e| ServiceError::Config(format!("{}: {}", ENV_BACKEND, e)))?;
        }
        if let Some(path) = lookup(ENV_AUDIT_LOG).filter(|v| !v.trim().is_empty()) {
            self.audit_log_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// The policy every run uses: the named preset, the inline policy, or the default
    pub fn effective_policy(&self) -> Result<PolicyDescriptor> {
        match (&self.preset, &self.policy) {
            (Some(_), Some(_)) => Err(ServiceError::Config(
                "set either `preset` or `policy`, not both".to_string(),
            )),
            (Some(id), None) => get_presets()
                .get(id)
                .map(|preset| preset.policy.clone())
                .ok_or_else(|| {
                    ServiceError::Config(format!(
                        "unknown preset '{}' (available: {})",
                        id,
                        get_presets().list_ids().join(", ")
                    ))
                }),
            (None, Some(policy)) => Ok(policy.clone()),
            (None, None) => Ok(PolicyDescriptor::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.governor.backend, BackendKind::Process);
        assert_eq!(config.governor.kill_grace(), DEFAULT_KILL_GRACE);
        assert_eq!(config.effective_policy().unwrap(), PolicyDescriptor::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"bind": "0.0.0.0:9000"}}, "policy": {{"max_output_bytes": 128}}}}"#
        )
        .unwrap();

        let config = ServiceConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.max_request_bytes, DEFAULT_MAX_REQUEST_BYTES);
        let policy = config.effective_policy().unwrap();
        assert_eq!(policy.max_output_bytes, 128);
        assert!(policy.allows("print"));
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ nope").unwrap();
        let err = ServiceConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
        assert!(ServiceConfig::load_from_file("/nonexistent/learnbox.json").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BIND, "127.0.0.1:7000"),
            (ENV_BACKEND, "Thread"),
            (ENV_AUDIT_LOG, "/tmp/learnbox-audit.jsonl"),
        ]
        .into_iter()
        .collect();
        let mut config = ServiceConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7000");
        assert_eq!(config.governor.backend, BackendKind::Thread);
        assert_eq!(
            config.audit_log_path.as_deref(),
            Some(Path::new("/tmp/learnbox-audit.jsonl"))
        );

        let err = config
            .apply_env(|k| (k == ENV_BACKEND).then(|| "docker".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_BACKEND));
    }

    #[test]
    fn test_preset_selection() {
        let config = ServiceConfig {
            preset: Some("lesson-extended-v1".to_string()),
            ..Default::default()
        };
        assert!(config.effective_policy().unwrap().allows("sorted"));

        let unknown = ServiceConfig {
            preset: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(unknown.effective_policy().is_err());

        let both = ServiceConfig {
            preset: Some("lesson-basic-v1".to_string()),
            policy: Some(PolicyDescriptor::default()),
            ..Default::default()
        };
        assert!(both.effective_policy().is_err());
    }
}
