use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Single,
    Multiple,
    FreeText,
    Paired,
    MultiValued,
}

impl QuestionKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Single => "single choice",
            Self::Multiple => "multiple choice",
            Self::FreeText => "free text",
            Self::Paired => "paired matching",
            Self::MultiValued => "multi-valued matching",
        }
    }

    pub fn is_matching(self) -> bool {
        matches!(self, Self::Paired | Self::MultiValued)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Low,
    #[default]
    Normal,
    Medium,
    High,
    VeryHigh,
}

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very high",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfiguration {
    pub topic: String,
    pub level: Level,
    pub kinds: Vec<QuestionKind>,
    pub question_count: usize,
    pub time_limit_seconds: u64,
}

impl TestConfiguration {
    pub fn summary(&self) -> String {
        let kinds: Vec<&str> = self.kinds.iter().map(|kind| kind.label()).collect();
        format!(
            "[topic = {}, level = {}, kinds = [{}], questions = {}, time limit = {} seconds]",
            self.topic,
            self.level.label(),
            kinds.join(", "),
            self.question_count,
            self.time_limit_seconds
        )
    }
}

fn default_shuffle() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(default)]
    pub id: u32,
    pub text: String,
    pub topic: String,
    #[serde(default)]
    pub level: Level,
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub option_values: Vec<Vec<String>>,
    pub answers: Vec<String>,
    #[serde(default = "default_shuffle")]
    pub shuffle_options: bool,
}

impl Question {
    pub fn normalized(mut self) -> Self {
        if self.kind == QuestionKind::Paired && self.option_values.len() == 1 {
            let shared = self.option_values[0].clone();
            self.option_values = vec![shared; self.options.len()];
        }
        self
    }

    pub fn view(&self, ordinal: usize, total: usize) -> QuestionView {
        QuestionView {
            id: self.id,
            text: self.text.clone(),
            kind: self.kind,
            media: self.media.clone(),
            options: self.options.clone(),
            option_values: self.option_values.clone(),
            ordinal,
            total,
            title: format!("Question {ordinal} / {total}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: u32,
    pub text: String,
    pub kind: QuestionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub option_values: Vec<Vec<String>>,
    pub ordinal: usize,
    pub total: usize,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub kind: QuestionKind,
    pub ordinal: usize,
    pub values: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreTier {
    FirstCorrect,
    Correct,
    Incorrect,
    Unanswered,
}

impl ScoreTier {
    pub fn points(self) -> i64 {
        match self {
            Self::FirstCorrect => 2,
            Self::Correct => 1,
            Self::Incorrect => 0,
            Self::Unanswered => -1,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::FirstCorrect => "Correct and first to answer, 2 points :-)",
            Self::Correct => "Correct answer, 1 point :-)",
            Self::Incorrect => "Wrong answer, 0 points :-(",
            Self::Unanswered => "No answer sent, -1 point :-(",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    pub first_correct: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub unanswered: u32,
}

impl TierCounts {
    pub fn record(&mut self, tier: ScoreTier) {
        match tier {
            ScoreTier::FirstCorrect => self.first_correct += 1,
            ScoreTier::Correct => self.correct += 1,
            ScoreTier::Incorrect => self.incorrect += 1,
            ScoreTier::Unanswered => self.unanswered += 1,
        }
    }
}
