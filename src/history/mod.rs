mod file;
mod memory;
mod redis;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;
pub use self::redis::RedisSessionStore;

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ ChatMessage, Role };

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),
    #[error("unsupported session store type: {0}")]
    UnsupportedStore(String),
    #[error("session file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Ordered message log of one conversation.
///
/// A system message, when present, lives in its own slot ahead of everything else and is
/// never counted against [`recent_window`](Self::recent_window).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    system: Option<ChatMessage>,
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.set_system_prompt(prompt);
        history
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system = Some(ChatMessage::system(prompt));
    }

    pub fn system(&self) -> Option<&ChatMessage> {
        self.system.as_ref()
    }

    /// Appends a message. A system message pushed onto an empty log takes the system slot.
    pub fn push(&mut self, message: ChatMessage) {
        if message.role == Role::System && self.is_empty() {
            self.system = Some(message);
        } else {
            self.messages.push(message);
        }
    }

    /// Last `n` messages, without the system message.
    pub fn recent(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// System message (if any) followed by the last `n` messages, in order.
    pub fn recent_window(&self, n: usize) -> Vec<ChatMessage> {
        self.system.iter().chain(self.recent(n)).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.system.iter().chain(self.messages.iter()).cloned().collect()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last().or(self.system.as_ref())
    }

    pub fn len(&self) -> usize {
        self.messages.len() + usize::from(self.system.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.system = None;
        self.messages.clear();
    }

    /// Replaces the whole log. Roles are kept as they are; a leading system message
    /// becomes the system slot.
    pub fn restore(&mut self, messages: Vec<ChatMessage>) {
        self.clear();
        let mut iter = messages.into_iter().peekable();
        if let Some(first) = iter.next_if(|m| m.role == Role::System) {
            self.system = Some(first);
        }
        self.messages.extend(iter);
    }
}

/// Last `cap` entries of `messages`. A leading system message is kept in front and not
/// counted against `cap`.
pub fn capped(messages: &[ChatMessage], cap: usize) -> Vec<ChatMessage> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    };
    system
        .into_iter()
        .chain(&rest[rest.len().saturating_sub(cap)..])
        .cloned()
        .collect()
}

pub(crate) fn validate_session_id(session_id: &str) -> Result<(), HistoryError> {
    let invalid =
        session_id.is_empty() ||
        session_id.contains(['/', '\\']) ||
        session_id.contains("..") ||
        session_id.chars().any(char::is_control);
    if invalid {
        return Err(HistoryError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// Persistence for capped message lists keyed by session id.
///
/// Stores do not coordinate writers: the last `save` for a session wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists the last `cap` messages of `messages`, replacing what was stored.
    async fn save(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), HistoryError>;

    /// Returns the stored messages, or an empty list for an unknown session.
    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>, HistoryError>;

    async fn clear(&self, session_id: &str) -> Result<(), HistoryError>;
}

pub fn create_session_store(args: &Args) -> Result<Arc<dyn SessionStore>, HistoryError> {
    match args.session_store.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemorySessionStore::new(args.session_cap))),
        "file" => Ok(Arc::new(FileSessionStore::new(&args.session_dir, args.session_cap))),
        "redis" => {
            let store = RedisSessionStore::new(
                &args.session_redis_url,
                &args.session_redis_prefix,
                args.session_cap
            )?;
            Ok(Arc::new(store))
        }
        other => Err(HistoryError::UnsupportedStore(other.to_string())),
    }
}

pub fn initialize_session_store(args: &Args) -> Result<Arc<dyn SessionStore>, HistoryError> {
    let location = match args.session_store.to_lowercase().as_str() {
        "file" => args.session_dir.clone(),
        "redis" => args.session_redis_url.clone(),
        _ => "process memory".to_string(),
    };
    info!(
        "Sessions will be stored in: {} at {} (last {} messages)",
        args.session_store,
        location,
        args.session_cap
    );
    create_session_store(args)
}
