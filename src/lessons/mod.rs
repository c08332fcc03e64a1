/// Read-only lesson content served next to the sandbox.
///
/// Handlers only see the [`LessonStore`] trait, so the bundled table can be
/// swapped for a file (or a test double) without touching routing.
pub mod store;

use serde::{Deserialize, Serialize};

pub use store::StaticLessonStore;

/// Locale every lesson must carry and every lookup falls back to
pub const DEFAULT_LOCALE: &str = "en";

/// Level reported for lessons that do not name one
pub const DEFAULT_LEVEL: &str = "Beginner";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub question: String,
    pub answer: String,
}

/// A lesson with every field resolved to a single locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedLesson {
    pub id: u32,
    pub level: String,
    pub title: String,
    pub body: String,
    pub quiz: Quiz,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonFilter {
    /// Matched case-insensitively against the lesson level
    pub level: Option<String>,
    pub locale: String,
}

impl Default for LessonFilter {
    fn default() -> Self {
        Self {
            level: None,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

impl LessonFilter {
    pub fn new(level: Option<String>, locale: Option<String>) -> Self {
        Self {
            level: level.filter(|l| !l.trim().is_empty()),
            locale: locale
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
        }
    }

    pub fn matches_level(&self, level: &str) -> bool {
        match &self.level {
            Some(wanted) => wanted.trim().eq_ignore_ascii_case(level),
            None => true,
        }
    }
}

pub trait LessonStore: Send + Sync {
    fn get(&self, id: u32, locale: &str) -> Option<LocalizedLesson>;

    /// Lessons matching `filter`, ordered by id
    fn list(&self, filter: &LessonFilter) -> Vec<LocalizedLesson>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_defaults() {
        let filter = LessonFilter::new(None, None);
        assert_eq!(filter.locale, "en");
        assert!(filter.matches_level("Anything"));

        let blank = LessonFilter::new(Some("  ".to_string()), Some(String::new()));
        assert_eq!(blank, LessonFilter::default());
    }

    #[test]
    fn test_level_match_ignores_case() {
        let filter = LessonFilter::new(Some("beginner".to_string()), None);
        assert!(filter.matches_level("Beginner"));
        assert!(!filter.matches_level("Intermediate"));
    }
}
