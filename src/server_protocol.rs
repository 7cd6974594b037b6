use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::ranking_store::Ranking;
use crate::server_utils::{normalize_configuration, normalize_extension_seconds, sanitize_name};
use crate::types::{Answer, Question, QuestionView, ScoreTier, TestConfiguration, TierCounts};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Register(String),
    StartTest(TestConfiguration),
    SubmitAnswer(Answer),
    ExtendTime(u64),
    Stop,
    Pause,
    Resume,
    Chat(String),
    UploadQuestion(Question),
    Leave,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<TestConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<ScoreTier>,
    pub paused: bool,
}

impl RunStatus {
    pub fn idle() -> Self {
        Self {
            active: false,
            config: None,
            question: None,
            tier: None,
            paused: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummaryEntry {
    pub name: String,
    pub run_points: i64,
    pub earned: i64,
    pub tiers: TierCounts,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(
    tag = "kind",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    Accepted,
    Rejected {
        reason: String,
    },
    Welcome {
        participants: String,
        topics: Vec<String>,
        ranking: Ranking,
    },
    RunStatus(RunStatus),
    Notice(String),
    RunRequested {
        requester: String,
        config: TestConfiguration,
    },
    Question(QuestionView),
    Tick(String),
    Outcome {
        tier: ScoreTier,
        message: String,
    },
    Scoreboard {
        ordinal: usize,
        scores: BTreeMap<String, i64>,
        text: String,
    },
    Paused {
        by: String,
    },
    Resumed {
        by: String,
    },
    RunSummary {
        entries: Vec<RunSummaryEntry>,
    },
    RunEnded {
        ranking: Option<Ranking>,
    },
    Chat(String),
    Error(String),
}

impl ServerMessage {
    pub fn notice(text: impl Into<String>) -> Self {
        Self::Notice(text.into())
    }

    pub fn outcome(tier: ScoreTier) -> Self {
        Self::Outcome {
            tier,
            message: tier.message().to_string(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn parse_client_message(raw: &str) -> Result<ClientMessage> {
    let message: ClientMessage = serde_json::from_str(raw)?;
    match message {
        ClientMessage::Register(name) => {
            let name = sanitize_name(&name)
                .ok_or_else(|| ServerError::Protocol("name must not be empty".to_string()))?;
            Ok(ClientMessage::Register(name))
        }
        ClientMessage::StartTest(config) => Ok(ClientMessage::StartTest(
            normalize_configuration(config).map_err(ServerError::Protocol)?,
        )),
        ClientMessage::ExtendTime(seconds) => {
            let seconds = normalize_extension_seconds(seconds).ok_or_else(|| {
                ServerError::Protocol("extension must be a positive number of seconds".to_string())
            })?;
            Ok(ClientMessage::ExtendTime(seconds))
        }
        ClientMessage::UploadQuestion(question) => {
            if question.topic.trim().is_empty() || question.text.trim().is_empty() {
                return Err(ServerError::Protocol(
                    "question needs a topic and a text".to_string(),
                ));
            }
            Ok(ClientMessage::UploadQuestion(question.normalized()))
        }
        other => Ok(other),
    }
}
