use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::{ debug, warn };
use serde::{ Deserialize, Serialize };
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use crate::history::{ capped, validate_session_id, HistoryError, SessionStore };
use crate::models::chat::ChatMessage;

#[derive(Serialize, Deserialize)]
struct StoredSession {
    session_id: String,
    saved_at: DateTime<Utc>,
    messages: Vec<ChatMessage>,
}

/// One JSON document per session inside a directory.
pub struct FileSessionStore {
    dir: PathBuf,
    cap: usize,
}

impl FileSessionStore {
    pub fn new(dir: impl AsRef<Path>, cap: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            cap,
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, HistoryError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.json", session_id)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        let path = self.path_for(session_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let stored = StoredSession {
            session_id: session_id.to_string(),
            saved_at: Utc::now(),
            messages: capped(messages, self.cap),
        };
        let json = serde_json::to_vec_pretty(&stored)?;

        // Write then rename so readers never see a half-written session.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Saved {} message(s) to {}", stored.messages.len(), path.display());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<ChatMessage>, HistoryError> {
        let path = self.path_for(session_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e.into());
            }
        };
        let stored: StoredSession = serde_json::from_slice(&bytes)?;
        if stored.session_id != session_id {
            warn!(
                "Session file {} names session '{}', loading it anyway",
                path.display(),
                stored.session_id
            );
        }
        Ok(stored.messages)
    }

    async fn clear(&self, session_id: &str) -> Result<(), HistoryError> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
