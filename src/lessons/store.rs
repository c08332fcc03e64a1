use super::{LessonFilter, LessonStore, LocalizedLesson, Quiz, DEFAULT_LEVEL, DEFAULT_LOCALE};
use crate::config::types::{Result, ServiceError};
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const BUNDLED_LESSONS: &str = include_str!("lessons.json");

type Translations = HashMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
struct QuizRecord {
    question: Translations,
    answer: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LessonRecord {
    id: u32,
    #[serde(default = "default_level")]
    level: String,
    title: Translations,
    body: Translations,
    quiz: QuizRecord,
}

fn default_level() -> String {
    DEFAULT_LEVEL.to_string()
}

impl LessonRecord {
    fn check(&self) -> Result<()> {
        let fields = [
            ("title", &self.title),
            ("body", &self.body),
            ("quiz.question", &self.quiz.question),
        ];
        for (name, translations) in fields {
            if !translations.contains_key(DEFAULT_LOCALE) {
                return Err(ServiceError::Lessons(format!(
                    "lesson {} has no '{}' {}",
                    self.id, DEFAULT_LOCALE, name
                )));
            }
        }
        Ok(())
    }

    fn localize(&self, locale: &str) -> LocalizedLesson {
        LocalizedLesson {
            id: self.id,
            level: self.level.clone(),
            title: resolve(&self.title, locale),
            body: resolve(&self.body, locale),
            quiz: Quiz {
                question: resolve(&self.quiz.question, locale),
                answer: self.quiz.answer.clone(),
            },
        }
    }
}

/// Pick `locale`, falling back to the default locale for this field only
fn resolve(translations: &Translations, locale: &str) -> String {
    translations
        .get(locale)
        .or_else(|| translations.get(DEFAULT_LOCALE))
        .cloned()
        .unwrap_or_default()
}

/// Immutable lesson table loaded once at startup
#[derive(Debug, Clone)]
pub struct StaticLessonStore {
    lessons: BTreeMap<u32, LessonRecord>,
}

impl StaticLessonStore {
    /// The table compiled into the binary
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_LESSONS)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Lessons(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Bundled table unless a replacement file is configured
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::bundled(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let records: Vec<LessonRecord> = serde_json::from_str(content)
            .map_err(|e| ServiceError::Lessons(format!("Failed to parse lessons: {}", e)))?;

        let mut lessons = BTreeMap::new();
        for record in records {
            record.check()?;
            let id = record.id;
            if lessons.insert(id, record).is_some() {
                return Err(ServiceError::Lessons(format!("duplicate lesson id {}", id)));
            }
        }
        debug!("Loaded {} lessons", lessons.len());
        Ok(Self { lessons })
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}

impl LessonStore for StaticLessonStore {
    fn get(&self, id: u32, locale: &str) -> Option<LocalizedLesson> {
        self.lessons.get(&id).map(|record| record.localize(locale))
    }

    fn list(&self, filter: &LessonFilter) -> Vec<LocalizedLesson> {
        self.lessons
            .values()
            .filter(|record| filter.matches_level(&record.level))
            .map(|record| record.localize(&filter.locale))
            .collect()
    }
}
