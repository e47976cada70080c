pub mod prompt;

use crate::cli::Args;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Sampling and context settings applied to every request a [`crate::agent::ChatAgent`] sends.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    /// Sent as `options.num_predict`.
    pub max_tokens: u32,
    /// Overrides any system message held in the conversation history.
    pub system_prompt: Option<String>,
    /// Number of non-system messages resent as chat context.
    pub history_limit: usize,
    /// When false, chat requests carry only the system prompt and the new message.
    /// Turns are still recorded.
    pub use_history: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 4096,
            system_prompt: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            use_history: true,
        }
    }
}

impl RequestConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Self::default() }
    }
}

impl From<&Args> for RequestConfig {
    fn from(args: &Args) -> Self {
        Self {
            model: args.model.clone(),
            temperature: args.temperature,
            top_p: args.top_p,
            max_tokens: args.max_tokens,
            system_prompt: args.system_prompt.clone().filter(|s| !s.trim().is_empty()),
            history_limit: args.history_limit,
            use_history: !args.no_history,
        }
    }
}

/// Connection settings for [`crate::llm::transport::OllamaTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            connect_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Self::default() }
    }
}

impl From<&Args> for ClientConfig {
    fn from(args: &Args) -> Self {
        Self {
            host: args.host.clone(),
            connect_timeout: args.connect_timeout_secs.map(Duration::from_secs),
        }
    }
}
