#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use quiz_challenge_server::engine::TestEngineOptions;
use quiz_challenge_server::question_bank::InMemoryQuestionBank;
use quiz_challenge_server::registry::OutboundMessage;
use quiz_challenge_server::session::{greet, ServerState, Session, SharedState};
use quiz_challenge_server::types::{Level, Question, QuestionKind};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub struct Client {
    pub session: Session,
    pub rx: mpsc::Receiver<OutboundMessage>,
}

impl Client {
    pub async fn send(&self, message: Value) {
        self.session.dispatch(&message.to_string()).await;
    }

    pub async fn answer(&self, ordinal: usize, value: &str) {
        self.send(json!({
            "kind": "submit_answer",
            "payload": {"kind": "single", "ordinal": ordinal, "values": [value]}
        }))
        .await;
    }

    pub async fn next_of(&mut self, kind: &str) -> Value {
        next_of(&mut self.rx, kind).await
    }

    pub async fn next_tick(&mut self) -> u64 {
        let tick = self.next_of("tick").await;
        tick["payload"]
            .as_str()
            .and_then(|value| value.parse().ok())
            .expect("numeric tick")
    }

    /// Every message up to and including the next one of `kind`.
    pub async fn collect_until(&mut self, kind: &str) -> Vec<Value> {
        let mut seen = Vec::new();
        loop {
            let value = next_of(&mut self.rx, "").await;
            let done = value["kind"] == kind;
            seen.push(value);
            if done {
                return seen;
            }
        }
    }

    pub fn drain(&mut self) -> Vec<Value> {
        drain(&mut self.rx)
    }
}

pub fn single(text: &str, answer: &str) -> Question {
    Question {
        id: 0,
        text: text.to_string(),
        topic: "Maths".to_string(),
        level: Level::Normal,
        kind: QuestionKind::Single,
        media: None,
        options: vec!["1".to_string(), "2".to_string(), "4".to_string()],
        option_values: Vec::new(),
        answers: vec![answer.to_string()],
        shuffle_options: true,
    }
}

pub fn server(questions: Vec<Question>) -> SharedState {
    Arc::new(ServerState::new(
        Arc::new(InMemoryQuestionBank::with_questions(questions)),
        TestEngineOptions {
            lead_in_seconds: 2,
            tick_interval: Duration::from_secs(1),
        },
        1024,
    ))
}

pub fn register(name: &str) -> String {
    json!({"kind": "register", "payload": name}).to_string()
}

pub fn start_test(count: usize, time_limit: u64) -> Value {
    json!({
        "kind": "start_test",
        "payload": {
            "topic": "Maths",
            "level": "normal",
            "kinds": ["single"],
            "questionCount": count,
            "timeLimitSeconds": time_limit
        }
    })
}

pub async fn connect(state: &SharedState, name: &str) -> Client {
    let (tx, rx) = mpsc::channel(1024);
    let session = greet(state, &register(name), tx)
        .await
        .expect("registration accepted");
    Client { session, rx }
}

/// Next message of `kind`, skipping others. An empty `kind` matches anything.
pub async fn next_of(rx: &mut mpsc::Receiver<OutboundMessage>, kind: &str) -> Value {
    let wait = async {
        loop {
            match rx.recv().await.expect("session queue open") {
                OutboundMessage::Text(text) => {
                    let value: Value = serde_json::from_str(&text).expect("valid json");
                    if kind.is_empty() || value["kind"] == kind {
                        return value;
                    }
                }
                OutboundMessage::Close { .. } => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3_600), wait)
        .await
        .unwrap_or_else(|_| panic!("no {kind} message arrived"))
}

pub fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<Value> {
    let mut values = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let OutboundMessage::Text(text) = message {
            values.push(serde_json::from_str(&text).expect("valid json"));
        }
    }
    values
}

pub fn kinds(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|value| value["kind"].as_str().map(str::to_string))
        .collect()
}
