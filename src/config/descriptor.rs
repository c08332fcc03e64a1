/// Policy descriptor: the single declaration of what a submission may do.
///
/// The static validator reads `forbidden_identifiers` and `max_source_bytes`;
/// the runtime builds its operation table from `allowed_operations` and the
/// governor enforces the remaining ceilings. Nothing else decides.
use crate::config::types::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Operations a fresh policy exposes
pub const DEFAULT_ALLOWED_OPERATIONS: &[&str] = &["print", "range", "len", "min", "max", "sum"];

/// Words rejected wherever they appear as code: syntax forms with no place in a
/// lesson snippet, evaluation and reflection builtins, and host module names.
pub const DEFAULT_FORBIDDEN_IDENTIFIERS: &[&str] = &[
    // syntax forms
    "import",
    "from",
    "lambda",
    "class",
    "global",
    "nonlocal",
    "with",
    "try",
    "except",
    "finally",
    "raise",
    "yield",
    "async",
    "await",
    "del",
    // evaluation and reflection
    "eval",
    "exec",
    "compile",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "type",
    "object",
    "super",
    "breakpoint",
    "help",
    "memoryview",
    "exit",
    "quit",
    // host modules
    "os",
    "sys",
    "io",
    "subprocess",
    "socket",
    "shutil",
    "requests",
    "pathlib",
    "builtins",
    "importlib",
    "ctypes",
    "pickle",
    "marshal",
    "signal",
    "threading",
    "multiprocessing",
    "urllib",
    "http",
];

pub const DEFAULT_MAX_SOURCE_BYTES: usize = 10 * 1024;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_WALL_CLOCK_MILLIS: u64 = 2_000;
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 32 * 1024 * 1024;

/// Immutable, process-wide execution policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDescriptor {
    /// Operation names installed into every run
    pub allowed_operations: BTreeSet<String>,
    /// Identifier and keyword tokens that block a submission outright
    pub forbidden_identifiers: BTreeSet<String>,
    pub max_source_bytes: usize,
    pub max_output_bytes: usize,
    pub max_wall_clock_millis: u64,
    pub max_memory_bytes: u64,
}

impl Default for PolicyDescriptor {
    fn default() -> Self {
        Self {
            allowed_operations: DEFAULT_ALLOWED_OPERATIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            forbidden_identifiers: DEFAULT_FORBIDDEN_IDENTIFIERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_wall_clock_millis: DEFAULT_MAX_WALL_CLOCK_MILLIS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }
}

impl PolicyDescriptor {
    pub fn allows(&self, operation: &str) -> bool {
        self.allowed_operations.contains(operation)
    }

    pub fn forbids(&self, word: &str) -> bool {
        self.forbidden_identifiers.contains(word)
    }

    pub fn wall_clock(&self) -> Duration {
        Duration::from_millis(self.max_wall_clock_millis)
    }

    /// Ceilings the governor enforces for one run under this policy
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            wall_clock: self.wall_clock(),
            memory_bytes: self.max_memory_bytes,
            output_bytes: self.max_output_bytes,
        }
    }

    /// Builder-style helper used by presets and tests
    pub fn with_operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_operations = operations.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = PolicyDescriptor::default();
        for op in ["print", "range", "len", "min", "max", "sum"] {
            assert!(policy.allows(op), "{op} should be allowed");
        }
        assert!(!policy.allows("sorted"));
        assert!(policy.forbids("import"));
        assert!(policy.forbids("eval"));
        assert!(!policy.forbids("print"));
        assert_eq!(policy.max_source_bytes, 10 * 1024);
    }

    #[test]
    fn test_defaults_do_not_overlap() {
        let policy = PolicyDescriptor::default();
        assert!(policy
            .allowed_operations
            .is_disjoint(&policy.forbidden_identifiers));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let policy: PolicyDescriptor =
            serde_json::from_str(r#"{"max_wall_clock_millis": 500}"#).unwrap();
        assert_eq!(policy.wall_clock(), Duration::from_millis(500));
        assert_eq!(policy.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert!(policy.allows("print"));
    }

    #[test]
    fn test_limits_mirror_policy() {
        let policy = PolicyDescriptor {
            max_memory_bytes: 1024,
            ..Default::default()
        };
        let limits = policy.limits();
        assert_eq!(limits.memory_bytes, 1024);
        assert_eq!(limits.output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
    }
}
