use async_trait::async_trait;
use chrono::Utc;
use log::error;
use redis::{ AsyncCommands, Client };
use serde::{ Deserialize, Serialize };
use crate::history::{ capped, validate_session_id, HistoryError, SessionStore };
use crate::models::chat::{ ChatMessage, Role };

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    role: Role,
    content: String,
    timestamp: i64,
}

/// One redis list per session, oldest message first.
pub struct RedisSessionStore {
    client: Client,
    key_prefix: String,
    cap: usize,
}

impl RedisSessionStore {
    pub fn new(url: &str, key_prefix: &str, cap: usize) -> Result<Self, HistoryError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix: key_prefix.to_string(),
            cap,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn key(&self, session_id: &str) -> Result<String, HistoryError> {
        validate_session_id(session_id)?;
        Ok(format!("{}{}", self.key_prefix, session_id))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        let key = self.key(session_id)?;
        let timestamp = Utc::now().timestamp();
        let entries = capped(messages, self.cap)
            .iter()
            .map(|m| {
                serde_json::to_string(
                    &(StoredMessage {
                        role: m.role.clone(),
                        content: m.content.clone(),
                        timestamp,
                    })
                )
            })
            .collect::<Result<Vec<String>, _>>()?;

        let mut conn = self.get_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !entries.is_empty() {
            pipe.rpush(&key, entries).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        let key = self.key(session_id)?;
        let mut conn = self.get_connection().await?;
        let json_entries: Vec<String> = conn.lrange(&key, 0, -1).await?;
        let mut messages = Vec::with_capacity(json_entries.len());

        for json_entry in &json_entries {
            match serde_json::from_str::<StoredMessage>(json_entry) {
                Ok(msg) => messages.push(ChatMessage::new(msg.role, msg.content)),
                Err(e) => {
                    error!("Error parsing session entry for {}: {}", key, e);
                }
            }
        }

        Ok(messages)
    }

    async fn clear(&self, session_id: &str) -> Result<(), HistoryError> {
        let key = self.key(session_id)?;
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.del(&key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_and_validated() {
        let store = RedisSessionStore::new("redis://127.0.0.1:6379", "session:", 20).unwrap();
        assert_eq!(store.key("popup").unwrap(), "session:popup");
        assert!(store.key("a/b").is_err());
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(matches!(
            RedisSessionStore::new("not a url", "session:", 20),
            Err(HistoryError::Redis(_))
        ));
    }
}
