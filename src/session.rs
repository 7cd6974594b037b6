use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::chat::{format_chat, mentioned_recipients};
use crate::constants::{CLOSE_NAME_IN_USE, CLOSE_PROTOCOL_ERROR};
use crate::engine::{StopOrigin, TestEngine, TestEngineOptions};
use crate::error::ServerError;
use crate::question_bank::QuestionBank;
use crate::ranking_store::{RankingStore, RankingUpdate};
use crate::registry::{ConnectionRegistry, OutboundMessage, SessionHandle};
use crate::server_protocol::{parse_client_message, ClientMessage, RunStatus, ServerMessage};
use crate::server_utils::{format_participants, parse_ranking_limit};
use crate::types::{Answer, Question, TestConfiguration};

pub type SharedState = Arc<ServerState>;

pub struct ServerState {
    pub registry: Arc<ConnectionRegistry>,
    pub ranking: Arc<Mutex<RankingStore>>,
    pub bank: Arc<dyn QuestionBank>,
    active: Mutex<Option<Arc<TestEngine>>>,
    engine_options: TestEngineOptions,
    outbound_queue: usize,
}

impl ServerState {
    pub fn new(
        bank: Arc<dyn QuestionBank>,
        engine_options: TestEngineOptions,
        outbound_queue: usize,
    ) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            ranking: Arc::new(Mutex::new(RankingStore::new())),
            bank,
            active: Mutex::new(None),
            engine_options,
            outbound_queue: outbound_queue.max(1),
        }
    }

    pub async fn active_engine(&self) -> Option<Arc<TestEngine>> {
        self.active.lock().await.clone()
    }

    pub async fn start_test(
        self: &Arc<Self>,
        requester: &str,
        config: TestConfiguration,
    ) -> Option<JoinHandle<Option<RankingUpdate>>> {
        let engine = {
            let mut active = self.active.lock().await;
            if active.is_some() {
                tracing::info!(%requester, "test already running, request dropped");
                return None;
            }
            let engine = Arc::new(TestEngine::new(
                requester,
                config,
                self.registry.clone(),
                self.ranking.clone(),
                self.bank.clone(),
                self.engine_options.clone(),
            ));
            *active = Some(engine.clone());
            engine
        };

        let state = self.clone();
        Some(tokio::spawn(async move {
            let update = engine.run().await;
            let mut active = state.active.lock().await;
            if active
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &engine))
            {
                *active = None;
            }
            update
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Session {
    handle: SessionHandle,
    state: SharedState,
}

pub async fn greet(
    state: &SharedState,
    raw: &str,
    tx: mpsc::Sender<OutboundMessage>,
) -> Option<Session> {
    let name = match parse_client_message(raw) {
        Ok(ClientMessage::Register(name)) => name,
        Ok(_) => {
            reject_protocol(&tx, "expected a register message first");
            return None;
        }
        Err(error) => {
            reject_protocol(&tx, &error.to_string());
            return None;
        }
    };

    let handle = SessionHandle::new(name, tx);
    let onboarding = handle.clone();
    let registered = state
        .registry
        .register_with(handle.clone(), |others| async move {
            onboarding.send(&ServerMessage::Accepted);
            let status = match state.active_engine().await {
                Some(engine) => engine.onboard(onboarding.name()).await,
                None => RunStatus::idle(),
            };
            let ranking = state.ranking.lock().await.snapshot();
            onboarding.send(&ServerMessage::Welcome {
                participants: format_participants(&others),
                topics: state.bank.topics(),
                ranking,
            });
            onboarding.send(&ServerMessage::RunStatus(status));
        })
        .await;

    match registered {
        Ok(()) => {
            state
                .registry
                .broadcast(
                    &ServerMessage::notice(format!("[•] @{} joined.", handle.name())),
                    &[handle.name()],
                )
                .await;
            Some(Session {
                handle,
                state: state.clone(),
            })
        }
        Err(error @ ServerError::NameInUse(_)) => {
            let reason = error.to_string();
            tracing::info!(%reason, "registration rejected");
            handle.send(&ServerMessage::Rejected {
                reason: reason.clone(),
            });
            handle.close(CLOSE_NAME_IN_USE, &reason);
            None
        }
        Err(error) => {
            tracing::warn!(%error, "registration failed");
            handle.close(CLOSE_PROTOCOL_ERROR, &error.to_string());
            None
        }
    }
}

fn reject_protocol(tx: &mpsc::Sender<OutboundMessage>, reason: &str) {
    tracing::debug!(%reason, "greeting refused");
    let handle = SessionHandle::new("", tx.clone());
    handle.send(&ServerMessage::Error(reason.to_string()));
    handle.close(CLOSE_PROTOCOL_ERROR, reason);
}

impl Session {
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub async fn dispatch(&self, raw: &str) -> Flow {
        let message = match parse_client_message(raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(session = %self.name(), %error, "undecodable message");
                self.handle.send(&ServerMessage::Error(error.to_string()));
                self.handle
                    .close(CLOSE_PROTOCOL_ERROR, "invalid message");
                return Flow::Exit;
            }
        };

        match message {
            ClientMessage::Register(_) => {
                self.handle
                    .send(&ServerMessage::Error("already registered".to_string()));
            }
            ClientMessage::StartTest(config) => {
                self.state.start_test(self.name(), config).await;
            }
            ClientMessage::SubmitAnswer(answer) => self.submit_answer(&answer).await,
            ClientMessage::ExtendTime(seconds) => {
                if let Some(engine) = self.engine("extend").await {
                    engine.extend_time(seconds);
                    self.announce(format!("[•] @{} added {seconds} seconds.", self.name()))
                        .await;
                }
            }
            ClientMessage::Stop => {
                if let Some(engine) = self.engine("stop").await {
                    engine
                        .stop(StopOrigin::Participant(self.name().to_string()))
                        .await;
                    self.announce(format!("[•] @{} stopped the test.", self.name()))
                        .await;
                }
            }
            ClientMessage::Pause => {
                if let Some(engine) = self.engine("pause").await {
                    if engine.pause(self.name()).await {
                        self.announce(format!("[•] @{} paused the test.", self.name()))
                            .await;
                    }
                }
            }
            ClientMessage::Resume => {
                if let Some(engine) = self.engine("resume").await {
                    if engine.resume(self.name()).await {
                        self.announce(format!("[•] @{} resumed the test.", self.name()))
                            .await;
                    }
                }
            }
            ClientMessage::Chat(text) => self.chat(&text).await,
            ClientMessage::UploadQuestion(question) => self.upload(question).await,
            ClientMessage::Leave => return Flow::Exit,
        }
        Flow::Continue
    }

    async fn engine(&self, command: &str) -> Option<Arc<TestEngine>> {
        let engine = self.state.active_engine().await;
        if engine.is_none() {
            tracing::debug!(session = %self.name(), command, "no active test, command ignored");
        }
        engine
    }

    async fn submit_answer(&self, answer: &Answer) {
        if let Some(engine) = self.engine("submit_answer").await {
            engine.submit_answer(self.name(), answer).await;
        }
    }

    async fn chat(&self, text: &str) {
        let line = ServerMessage::Chat(format_chat(self.name(), text));
        let connected = self.state.registry.list().await;
        match mentioned_recipients(text, self.name(), &connected) {
            Some(recipients) => {
                self.state.registry.send_to_each(&recipients, &line).await;
            }
            None => {
                self.state.registry.broadcast(&line, &[self.name()]).await;
            }
        }
    }

    async fn upload(&self, question: Question) {
        let bank = self.state.bank.clone();
        let stored = match tokio::task::spawn_blocking(move || bank.store(question)).await {
            Ok(stored) => stored,
            Err(error) => {
                tracing::warn!(session = %self.name(), %error, "question upload task failed");
                return;
            }
        };
        match stored {
            Ok(stored) => {
                tracing::info!(session = %self.name(), topic = %stored.topic, id = stored.id, "question uploaded");
                self.announce(format!(
                    "[•] @{} added a {} question to {}.",
                    self.name(),
                    stored.kind.label(),
                    stored.topic
                ))
                .await;
            }
            Err(error) => {
                tracing::warn!(session = %self.name(), %error, "question upload failed");
                self.handle.send(&ServerMessage::Error(error.to_string()));
            }
        }
    }

    async fn announce(&self, text: String) {
        self.state
            .registry
            .broadcast(&ServerMessage::notice(text), &[])
            .await;
    }

    pub async fn close(self) {
        let name = self.name().to_string();
        let registry = &self.state.registry;
        registry
            .broadcast(
                &ServerMessage::notice(format!("[•] @{name} left.")),
                &[name.as_str()],
            )
            .await;
        registry.deregister(&name).await;

        if let Some(engine) = self.state.active_engine().await {
            engine.participant_left(&name).await;
            if registry.is_empty().await {
                tracing::info!("last participant left, abandoning test run");
                engine.stop(StopOrigin::Engine).await;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RankingQuery {
    limit: Option<String>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ranking", get(ranking_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ranking_handler(
    State(state): State<SharedState>,
    Query(query): Query<RankingQuery>,
) -> impl IntoResponse {
    let ranking = state.ranking.lock().await;
    Json(ranking.build_response(parse_ranking_limit(query.limit.as_deref())))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.outbound_queue);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    let session = match next_text(&mut ws_receiver).await {
        Some(raw) => greet(&state, &raw, tx.clone()).await,
        None => None,
    };
    if let Some(session) = session {
        tracing::info!(session = %session.name(), "session active");
        while let Some(raw) = next_text(&mut ws_receiver).await {
            if session.dispatch(&raw).await == Flow::Exit {
                break;
            }
        }
        session.close().await;
    }

    drop(tx);
    let _ = writer.await;
}

async fn next_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(received) = receiver.next().await {
        let message = match received {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%error, "websocket read failed");
                return None;
            }
        };
        match message {
            Message::Text(raw) => return Some(raw.to_string()),
            Message::Binary(raw) => return Some(String::from_utf8_lossy(&raw).into_owned()),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}
