use crate::models::chat::ChatMessage;
use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
        #[serde(default)]
        generate: bool,
    },
    #[serde(rename = "preset")] Preset {
        name: String,
        text: String,
        #[serde(default)]
        language: Option<String>,
    },
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "reset")]
    Reset,
    #[serde(rename = "resume")] Resume {
        session_id: String,
    },
    #[serde(rename = "status")]
    Status,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session")] Session {
        session_id: String,
    },
    #[serde(rename = "fragment")] Fragment {
        content: String,
    },
    #[serde(rename = "done")] Done {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "cancelled")] Cancelled {
        partial: String,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
    #[serde(rename = "status")] Status {
        available: bool,
    },
    #[serde(rename = "history")] History {
        messages: Vec<ChatMessage>,
    },
}
