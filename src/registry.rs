use std::future::Future;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Result, ServerError};
use crate::server_protocol::ServerMessage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Debug)]
pub struct SessionHandle {
    name: String,
    tx: mpsc::Sender<OutboundMessage>,
}

impl SessionHandle {
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, message: &ServerMessage) -> bool {
        match message.encode() {
            Ok(text) => self.send_text(text),
            Err(error) => {
                tracing::error!(session = %self.name, %error, "failed to encode outbound message");
                false
            }
        }
    }

    fn send_text(&self, text: String) -> bool {
        match self.tx.try_send(OutboundMessage::Text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session = %self.name, "outbound queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session = %self.name, "outbound queue closed, message dropped");
                false
            }
        }
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.try_send(OutboundMessage::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<Vec<SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // `onboard` runs under the registry lock and must not call back into it.
    pub async fn register_with<F, Fut>(&self, session: SessionHandle, onboard: F) -> Result<()>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut sessions = self.sessions.lock().await;
        if sessions.iter().any(|existing| existing.name == session.name) {
            return Err(ServerError::NameInUse(session.name));
        }
        let others = sessions.iter().map(|existing| existing.name.clone()).collect();
        onboard(others).await;
        tracing::info!(session = %session.name, "session registered");
        sessions.push(session);
        Ok(())
    }

    pub async fn register(&self, session: SessionHandle) -> Result<()> {
        self.register_with(session, |_| async {}).await
    }

    pub async fn deregister(&self, name: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|session| session.name != name);
        let removed = sessions.len() != before;
        if removed {
            tracing::info!(session = %name, remaining = sessions.len(), "session deregistered");
        }
        removed
    }

    pub async fn lookup(&self, name: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions.iter().find(|session| session.name == name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        sessions.iter().map(|session| session.name.clone()).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn broadcast(&self, message: &ServerMessage, exclude: &[&str]) -> usize {
        let text = match message.encode() {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, "failed to encode broadcast");
                return 0;
            }
        };
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|session| !exclude.contains(&session.name.as_str()))
            .filter(|session| session.send_text(text.clone()))
            .count()
    }

    pub async fn send_to(&self, name: &str, message: &ServerMessage) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.iter().find(|session| session.name == name) {
            Some(session) => session.send(message),
            None => {
                tracing::debug!(session = %name, "send to unknown session skipped");
                false
            }
        }
    }

    pub async fn send_to_each(&self, names: &[String], message: &ServerMessage) -> usize {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|session| names.contains(&session.name))
            .filter(|session| session.send(message))
            .count()
    }
}
