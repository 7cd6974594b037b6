use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("name '{0}' is already in use")]
    NameInUse(String),

    #[error("invalid message: {0}")]
    Protocol(String),

    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("question bank: {0}")]
    QuestionBank(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
