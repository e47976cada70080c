use crate::config::RequestConfig;
use crate::models::chat::ChatMessage;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const GENERATE_ROUTE: &str = "/api/generate";
pub const CHAT_ROUTE: &str = "/api/chat";

/// Which endpoint a request targets, and therefore where reply text lives.
///
/// Resolved once per request; each variant has exactly one extraction rule:
/// `{"response": ...}` for `Generate` and `{"message": {"content": ...}}` for `Chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    Generate,
    Chat,
}

impl RequestShape {
    /// `Generate` when `generate` is set, `Chat` otherwise.
    pub fn from_generate_flag(generate: bool) -> Self {
        if generate { RequestShape::Generate } else { RequestShape::Chat }
    }

    pub fn route(self) -> &'static str {
        match self {
            RequestShape::Generate => GENERATE_ROUTE,
            RequestShape::Chat => CHAT_ROUTE,
        }
    }

    /// Text carried by one decoded object, if the field exists.
    pub fn fragment(self, object: &Value) -> Option<&str> {
        match self {
            RequestShape::Generate => object.get("response")?.as_str(),
            RequestShape::Chat => object.get("message")?.get("content")?.as_str(),
        }
    }
}

impl fmt::Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestShape::Generate => f.write_str("generate"),
            RequestShape::Chat => f.write_str("chat"),
        }
    }
}

impl FromStr for RequestShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generate" => Ok(RequestShape::Generate),
            "chat" => Ok(RequestShape::Chat),
            _ => Err(format!("Unsupported request shape: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Options {
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
}

impl From<&RequestConfig> for Options {
    fn from(config: &RequestConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            num_predict: config.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: Options,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: Options,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    Generate(GenerateRequest),
    Chat(ChatRequest),
}

impl RequestBody {
    pub fn generate(
        config: &RequestConfig,
        system: Option<&str>,
        prompt: &str,
        stream: bool
    ) -> Self {
        RequestBody::Generate(GenerateRequest {
            model: config.model.clone(),
            prompt: prompt.to_string(),
            stream,
            options: Options::from(config),
            system: system.map(str::to_string),
        })
    }

    pub fn chat(config: &RequestConfig, messages: Vec<ChatMessage>, stream: bool) -> Self {
        RequestBody::Chat(ChatRequest {
            model: config.model.clone(),
            messages,
            stream,
            options: Options::from(config),
        })
    }

    pub fn shape(&self) -> RequestShape {
        match self {
            RequestBody::Generate(_) => RequestShape::Generate,
            RequestBody::Chat(_) => RequestShape::Chat,
        }
    }

    pub fn is_streaming(&self) -> bool {
        match self {
            RequestBody::Generate(req) => req.stream,
            RequestBody::Chat(req) => req.stream,
        }
    }
}
