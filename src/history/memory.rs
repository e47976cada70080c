use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use crate::history::{ capped, validate_session_id, HistoryError, SessionStore };
use crate::models::chat::ChatMessage;

/// Sessions held for the lifetime of the process.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
    cap: usize,
}

impl MemorySessionStore {
    pub fn new(cap: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cap,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        validate_session_id(session_id)?;
        let kept = capped(messages, self.cap);
        self.sessions.write().await.insert(session_id.to_string(), kept);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        validate_session_id(session_id)?;
        Ok(self.sessions.read().await.get(session_id).cloned().unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<(), HistoryError> {
        validate_session_id(session_id)?;
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}
