pub mod agent;
pub mod cli;
pub mod config;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use agent::ChatAgent;
use cli::{ Args, Command };
use config::prompt::load_prompts_or_default;
use config::{ ClientConfig, RequestConfig };
use history::initialize_session_store;
use llm::{ OllamaTransport, RequestShape };
use log::info;
use server::{ Server, ServerContext };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Ollama Host: {}", args.host);
    info!("Model: {}", args.model);
    info!("Temperature: {}", args.temperature);
    info!("Top P: {}", args.top_p);
    info!("Max Tokens: {}", args.max_tokens);
    info!("History Limit: {}", args.history_limit);
    info!("Send History: {}", !args.no_history);
    info!("System Prompt Set: {}", args.system_prompt.is_some());
    info!("Session Store Type: {}", args.session_store);
    info!("Session ID: {}", args.session_id);
    if let Some(path) = &args.prompts_path {
        info!("Prompts Path: {}", path);
    }
    info!("-------------------------");

    let transport = OllamaTransport::new(&ClientConfig::from(&args))?;
    let request_config = RequestConfig::from(&args);

    match args.command.clone().unwrap_or(Command::Chat { generate: false }) {
        Command::Status => {
            if transport.check_availability().await {
                println!("{} is online", transport.base_url());
                Ok(())
            } else {
                println!("{} is offline", transport.base_url());
                Err(format!("Ollama is not reachable at {}", transport.base_url()).into())
            }
        }
        Command::Models => {
            for model in transport.list_models().await? {
                println!("{}", model.name);
            }
            Ok(())
        }
        Command::Show { name } => {
            let name = name.unwrap_or_else(|| request_config.model.clone());
            cli::repl::run_show(&transport, &name, &mut std::io::stdout()).await
        }
        Command::Pull { name } => cli::repl::run_pull(&transport, &name, &mut std::io::stdout()).await,
        Command::Ask { prompt, preset, language, generate, no_stream } => {
            let prompts = load_prompts_or_default(args.prompts_path.as_deref())?;
            let mut agent = ChatAgent::new(transport, request_config);
            cli::repl::run_ask(
                &mut agent,
                &prompts,
                &prompt,
                preset.as_deref(),
                language.as_deref(),
                RequestShape::from_generate_flag(generate),
                !no_stream
            ).await
        }
        Command::Chat { generate } => {
            let store = initialize_session_store(&args)?;
            let mut agent = ChatAgent::new(transport, request_config);
            cli::repl::run_chat(&mut agent, store.as_ref(), &args.session_id, RequestShape::from_generate_flag(generate)).await
        }
        Command::Serve { addr } => {
            let context = Arc::new(ServerContext {
                transport,
                config: request_config,
                store: initialize_session_store(&args)?,
                prompts: load_prompts_or_default(args.prompts_path.as_deref())?,
            });
            info!("Starting server on: {}", addr);
            Server::new(addr, context).run().await
        }
    }
}
