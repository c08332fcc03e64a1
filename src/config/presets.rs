/// Versioned policy presets.
///
/// A preset is an immutable, named policy. Selecting one is explicit (config
/// `preset` field or `--preset`) and the chosen id is logged at startup.
use crate::config::descriptor::PolicyDescriptor;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Named policy preset
#[derive(Debug, Clone)]
pub struct PolicyPreset {
    /// Preset ID (e.g. "lesson-basic-v1")
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub version: String,
    pub policy: PolicyDescriptor,
}

impl PolicyPreset {
    pub fn get_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("preset_id".to_string(), self.id.clone());
        metadata.insert("preset_name".to_string(), self.name.clone());
        metadata.insert("preset_version".to_string(), self.version.clone());
        metadata.insert(
            "allowed_operations".to_string(),
            self.policy
                .allowed_operations
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
        );
        metadata
    }
}

/// Preset registry
pub struct PolicyPresets {
    presets: HashMap<String, PolicyPreset>,
}

impl PolicyPresets {
    pub fn new() -> Self {
        let mut presets = Self {
            presets: HashMap::new(),
        };
        presets.register_basic_v1();
        presets.register_extended_v1();
        presets
    }

    /// The six operations every beginner lesson relies on
    fn register_basic_v1(&mut self) {
        let preset = PolicyPreset {
            id: "lesson-basic-v1".to_string(),
            name: "Beginner lessons".to_string(),
            version: "1.0.0".to_string(),
            policy: PolicyDescriptor::default(),
        };
        self.presets.insert(preset.id.clone(), preset);
    }

    /// Conversions, sorting and rounding for later chapters, with a little more time
    fn register_extended_v1(&mut self) {
        let policy = PolicyDescriptor {
            max_wall_clock_millis: 3_000,
            max_memory_bytes: 64 * 1024 * 1024,
            ..PolicyDescriptor::default()
        }
        .with_operations([
            "print", "range", "len", "min", "max", "sum", "abs", "round", "str", "int", "float",
            "bool", "list", "sorted", "reversed",
        ]);

        let preset = PolicyPreset {
            id: "lesson-extended-v1".to_string(),
            name: "Intermediate lessons".to_string(),
            version: "1.0.0".to_string(),
            policy,
        };
        self.presets.insert(preset.id.clone(), preset);
    }

    pub fn get(&self, id: &str) -> Option<&PolicyPreset> {
        self.presets.get(id)
    }

    /// Preset ids in stable order
    pub fn list_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn has(&self, id: &str) -> bool {
        self.presets.contains_key(id)
    }
}

impl Default for PolicyPresets {
    fn default() -> Self {
        Self::new()
    }
}

static PRESETS: Lazy<PolicyPresets> = Lazy::new(PolicyPresets::new);

/// Global preset registry
pub fn get_presets() -> &'static PolicyPresets {
    &PRESETS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::builtins::Operation;

    #[test]
    fn test_presets_creation() {
        let presets = PolicyPresets::new();
        assert!(presets.has("lesson-basic-v1"));
        assert!(presets.has("lesson-extended-v1"));
        assert_eq!(presets.list_ids(), vec!["lesson-basic-v1", "lesson-extended-v1"]);
    }

    #[test]
    fn test_basic_matches_default_policy() {
        let preset = get_presets().get("lesson-basic-v1").unwrap();
        assert_eq!(preset.policy, PolicyDescriptor::default());
    }

    #[test]
    fn test_extended_names_only_known_operations() {
        let preset = get_presets().get("lesson-extended-v1").unwrap();
        for name in &preset.policy.allowed_operations {
            assert!(Operation::from_name(name).is_some(), "unknown operation {name}");
        }
        assert!(preset.policy.allows("sorted"));
    }

    #[test]
    fn test_preset_metadata() {
        let preset = get_presets().get("lesson-basic-v1").unwrap();
        let metadata = preset.get_metadata();
        assert_eq!(metadata.get("preset_id").unwrap(), "lesson-basic-v1");
        assert!(metadata.get("allowed_operations").unwrap().contains("print"));
    }
}
