pub mod repl;

use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Ollama Connection Args ---
    /// Base URL of the Ollama server
    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    pub host: String,

    /// Seconds to wait for the TCP connection to the Ollama server. No limit if unset.
    #[arg(long, env = "OLLAMA_CONNECT_TIMEOUT")]
    pub connect_timeout_secs: Option<u64>,

    // --- Request Args ---
    /// Model used for generate and chat requests (e.g., llama3.2, qwen2.5, mistral)
    #[arg(short = 'm', long, env = "OLLAMA_MODEL", default_value = "llama3.2")]
    pub model: String,

    /// Sampling temperature
    #[arg(long, env = "OLLAMA_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Nucleus sampling threshold
    #[arg(long, env = "OLLAMA_TOP_P", default_value = "0.9")]
    pub top_p: f32,

    /// Maximum number of tokens to generate (sent as num_predict)
    #[arg(long, env = "OLLAMA_MAX_TOKENS", default_value = "4096")]
    pub max_tokens: u32,

    /// System prompt sent ahead of the conversation
    #[arg(short = 's', long, env = "OLLAMA_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// Number of previous messages resent as chat context (system prompt not counted)
    #[arg(long, env = "HISTORY_LIMIT", default_value = "20")]
    pub history_limit: usize,

    /// Send each chat message on its own, without earlier turns as context
    #[arg(long, env = "NO_HISTORY", default_value = "false")]
    pub no_history: bool,

    // --- Session Store Args ---
    /// Session store type (memory, file, redis)
    #[arg(long, env = "SESSION_STORE", default_value = "file")]
    pub session_store: String,

    /// Directory holding session files when --session-store=file
    #[arg(long, env = "SESSION_DIR", default_value = ".ollama-chat/sessions")]
    pub session_dir: String,

    /// Redis URL when --session-store=redis
    #[arg(long, env = "SESSION_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub session_redis_url: String,

    /// Prefix for Redis session keys.
    #[arg(long, env = "SESSION_REDIS_PREFIX", default_value = "session:")]
    pub session_redis_prefix: String,

    /// Number of most recent messages kept when a session is saved
    #[arg(long, env = "SESSION_CAP", default_value = "20")]
    pub session_cap: usize,

    /// Session to resume and save to
    #[arg(long, env = "SESSION_ID", default_value = "default")]
    pub session_id: String,

    // --- General App Args ---
    /// Path to a JSON file with extra or replacement prompt presets.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check whether the Ollama server answers
    Status,
    /// List models installed on the Ollama server
    Models,
    /// Show the modelfile, parameters and details of a model (defaults to --model)
    Show {
        name: Option<String>,
    },
    /// Download a model, printing progress
    Pull {
        name: String,
    },
    /// Send one prompt and print the reply
    Ask {
        /// Prompt text, or the text a preset is applied to
        prompt: String,

        /// Wrap the prompt in a named preset (summarize, translate, explain, extract_code, sentiment)
        #[arg(short = 'p', long)]
        preset: Option<String>,

        /// Target language for the translate preset
        #[arg(short = 'l', long)]
        language: Option<String>,

        /// Use /api/generate instead of /api/chat
        #[arg(long)]
        generate: bool,

        /// Wait for the whole reply instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },
    /// Interactive conversation in the terminal (default)
    Chat {
        /// Use /api/generate instead of /api/chat
        #[arg(long)]
        generate: bool,
    },
    /// Relay conversations to WebSocket clients
    Serve {
        /// Host address and port for the server to listen on.
        #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
        addr: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let args = Args::try_parse_from(["ollama-chat"]).unwrap();
        assert_eq!(args.command, None);
        assert_eq!(args.session_cap, 20);
        assert_eq!(args.history_limit, 20);
    }

    #[test]
    fn parses_ask_with_preset() {
        let args = Args::try_parse_from([
            "ollama-chat",
            "ask",
            "Bonjour",
            "--preset",
            "translate",
            "-l",
            "Polish",
            "--no-stream",
        ]).unwrap();
        assert_eq!(
            args.command,
            Some(Command::Ask {
                prompt: "Bonjour".into(),
                preset: Some("translate".into()),
                language: Some("Polish".into()),
                generate: false,
                no_stream: true,
            })
        );
    }

    #[test]
    fn parses_model_management_commands() {
        let show = Args::try_parse_from(["ollama-chat", "show"]).unwrap();
        assert_eq!(show.command, Some(Command::Show { name: None }));

        let pull = Args::try_parse_from(["ollama-chat", "pull", "qwen2.5:7b"]).unwrap();
        assert_eq!(pull.command, Some(Command::Pull { name: "qwen2.5:7b".into() }));
    }
}
