use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, ServerError};
use crate::types::{Level, Question, QuestionKind};

pub trait QuestionBank: Send + Sync {
    fn topics(&self) -> Vec<String>;

    fn select(&self, topic: &str, level: Level, kinds: &[QuestionKind]) -> Result<Vec<Question>>;

    fn store(&self, question: Question) -> Result<Question>;
}

fn matches_filter(question: &Question, level: Level, kinds: &[QuestionKind]) -> bool {
    question.level == level && kinds.contains(&question.kind)
}

#[derive(Debug)]
pub struct DirectoryQuestionBank {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DirectoryQuestionBank {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn topic_dir(&self, topic: &str) -> Result<PathBuf> {
        let topic = topic.trim();
        let valid = !topic.is_empty()
            && !topic.starts_with('.')
            && !topic.contains(['/', '\\']);
        if !valid {
            return Err(ServerError::QuestionBank(format!(
                "invalid topic name {topic:?}"
            )));
        }
        Ok(self.root.join(topic))
    }
}

impl QuestionBank for DirectoryQuestionBank {
    fn topics(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(root = %self.root.display(), %error, "failed to list topics");
                return Vec::new();
            }
        };
        let mut topics: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();
        topics.sort();
        topics
    }

    fn select(&self, topic: &str, level: Level, kinds: &[QuestionKind]) -> Result<Vec<Question>> {
        let dir = self.topic_dir(topic)?;
        if !dir.is_dir() {
            return Err(ServerError::UnknownTopic(topic.to_string()));
        }
        Ok(load_questions(&dir, topic)
            .into_values()
            .filter(|question| matches_filter(question, level, kinds))
            .collect())
    }

    fn store(&self, mut question: Question) -> Result<Question> {
        let dir = self.topic_dir(&question.topic)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(&dir)?;

        question.id = next_question_id(&dir)?;
        question.topic = question.topic.trim().to_string();
        let path = dir.join(format!("{:05}.json", question.id));
        fs::write(&path, serde_json::to_string_pretty(&question)?)?;
        tracing::info!(path = %path.display(), "question stored");
        Ok(question)
    }
}

fn question_id_of(path: &Path) -> Option<u32> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

fn next_question_id(dir: &Path) -> Result<u32> {
    let highest = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| question_id_of(&entry.path()))
        .max()
        .unwrap_or(0);
    Ok(highest + 1)
}

fn load_questions(dir: &Path, topic: &str) -> BTreeMap<u32, Question> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(dir = %dir.display(), %error, "failed to read topic directory");
            return BTreeMap::new();
        }
    };

    let mut questions = BTreeMap::new();
    for path in entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()) {
        let Some(id) = question_id_of(&path) else {
            continue;
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read question");
                continue;
            }
        };
        match serde_json::from_str::<Question>(&text) {
            Ok(mut question) => {
                question.id = id;
                question.topic = topic.to_string();
                questions.insert(id, question.normalized());
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "skipping malformed question");
            }
        }
    }
    questions
}

#[derive(Debug, Default)]
pub struct InMemoryQuestionBank {
    questions: Mutex<Vec<Question>>,
}

impl InMemoryQuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_questions(questions: impl IntoIterator<Item = Question>) -> Self {
        let bank = Self::new();
        for question in questions {
            // Storing into memory cannot fail.
            let _ = bank.store(question);
        }
        bank
    }
}

impl QuestionBank for InMemoryQuestionBank {
    fn topics(&self) -> Vec<String> {
        let questions = self.questions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut topics: Vec<String> = questions.iter().map(|q| q.topic.clone()).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    fn select(&self, topic: &str, level: Level, kinds: &[QuestionKind]) -> Result<Vec<Question>> {
        let questions = self.questions.lock().unwrap_or_else(PoisonError::into_inner);
        if !questions.iter().any(|question| question.topic == topic) {
            return Err(ServerError::UnknownTopic(topic.to_string()));
        }
        Ok(questions
            .iter()
            .filter(|question| question.topic == topic && matches_filter(question, level, kinds))
            .cloned()
            .collect())
    }

    fn store(&self, question: Question) -> Result<Question> {
        let mut questions = self.questions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut question = question.normalized();
        question.id = questions
            .iter()
            .filter(|existing| existing.topic == question.topic)
            .map(|existing| existing.id)
            .max()
            .unwrap_or(0)
            + 1;
        questions.push(question.clone());
        Ok(question)
    }
}
