use crate::agent::{ ChatAgent, ReplyStream };
use crate::config::prompt::PromptConfig;
use crate::history::SessionStore;
use crate::llm::{ OllamaTransport, RequestShape, TransportError };
use crate::models::chat::Role;

use futures::StreamExt;
use log::{ error, info };
use std::error::Error;
use std::future::Future;
use std::io::Write;
use serde_json::Value;
use tokio::io::{ AsyncBufRead, AsyncBufReadExt, BufReader };

#[derive(Debug, PartialEq)]
pub enum TurnOutcome {
    Finished,
    Cancelled(String),
}

/// Resolves when the user presses Ctrl-C.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        futures::future::pending::<()>().await;
    }
}

/// Writes fragments to `out` as they arrive until the reply ends or `cancel` resolves.
pub async fn print_reply<W, F>(
    mut reply: ReplyStream<'_>,
    out: &mut W,
    cancel: F
) -> Result<TurnOutcome, Box<dyn Error + Send + Sync>>
    where W: Write, F: Future<Output = ()>
{
    tokio::pin!(cancel);
    loop {
        tokio::select! {
            fragment = reply.next() => {
                match fragment {
                    Some(Ok(text)) => {
                        out.write_all(text.as_bytes())?;
                        out.flush()?;
                    }
                    Some(Err(e)) => {
                        writeln!(out)?;
                        return Err(e.into());
                    }
                    None => {
                        writeln!(out)?;
                        return Ok(TurnOutcome::Finished);
                    }
                }
            }
            _ = &mut cancel => {
                let partial = reply.cancel();
                writeln!(out, "\n[cancelled]")?;
                return Ok(TurnOutcome::Cancelled(partial));
            }
        }
    }
}

pub async fn run_ask(
    agent: &mut ChatAgent,
    prompts: &PromptConfig,
    prompt: &str,
    preset: Option<&str>,
    language: Option<&str>,
    shape: RequestShape,
    stream: bool
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let input = match preset {
        Some(name) => prompts.render(name, prompt, language)?,
        None => prompt.to_string(),
    };

    if stream {
        let reply = agent.stream_reply(&input, shape).await?;
        print_reply(reply, &mut std::io::stdout(), ctrl_c()).await?;
    } else {
        let text = agent.reply(&input, shape).await?;
        println!("{}", text);
    }
    Ok(())
}

pub async fn run_show<W: Write>(
    transport: &OllamaTransport,
    name: &str,
    out: &mut W
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let info = transport.show_model(name).await?;
    writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
    Ok(())
}

/// Prints one line per progress object until the download finishes.
pub async fn run_pull<W: Write>(
    transport: &OllamaTransport,
    name: &str,
    out: &mut W
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut progress = transport.pull_model(name).await?;
    while let Some(update) = progress.next().await {
        let update = update?;
        if let Some(message) = update.get("error").and_then(Value::as_str) {
            return Err(TransportError::Remote(message.to_string()).into());
        }
        let status = update.get("status").and_then(Value::as_str).unwrap_or("working");
        let total = update.get("total").and_then(Value::as_u64);
        let completed = update.get("completed").and_then(Value::as_u64);
        match (completed, total) {
            (Some(done), Some(total)) if total > 0 => {
                writeln!(out, "{} {:>3}%", status, done.saturating_mul(100) / total)?;
            }
            _ => writeln!(out, "{}", status)?,
        }
        out.flush()?;
    }
    Ok(())
}

pub async fn run_chat(
    agent: &mut ChatAgent,
    store: &dyn SessionStore,
    session_id: &str,
    shape: RequestShape
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let input = BufReader::new(tokio::io::stdin());
    run_chat_with(agent, store, session_id, shape, input, &mut std::io::stdout(), ctrl_c).await
}

/// Chat loop over any line source. `interrupt` cancels a streaming reply, and ends the
/// session when it fires at the prompt.
pub async fn run_chat_with<R, W, I, F>(
    agent: &mut ChatAgent,
    store: &dyn SessionStore,
    session_id: &str,
    shape: RequestShape,
    input: R,
    out: &mut W,
    mut interrupt: I
) -> Result<(), Box<dyn Error + Send + Sync>>
    where R: AsyncBufRead + Unpin, W: Write, I: FnMut() -> F, F: Future<Output = ()>
{
    let restored = store.load(session_id).await?;
    if !restored.is_empty() {
        info!("Restored {} message(s) from session '{}'", restored.len(), session_id);
        agent.restore(restored);
    }

    if !agent.is_available().await {
        eprintln!("warning: Ollama is not reachable at {}", agent.transport().base_url());
    }
    writeln!(
        out,
        "Chatting with {} ({} mode). Ctrl-C cancels a reply, /quit, Ctrl-D or Ctrl-C at the prompt exits, /help lists commands.",
        agent.config().model,
        shape
    )?;

    let mut lines = input.lines();

    loop {
        write!(out, "> ")?;
        out.flush()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupt() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => {
                break;
            }
            "/help" => {
                writeln!(out, "/clear    forget this session")?;
                writeln!(out, "/history  show the conversation")?;
                writeln!(out, "/status   check the Ollama server")?;
                writeln!(out, "/quit     leave")?;
                continue;
            }
            "/clear" => {
                agent.reset();
                store.clear(session_id).await?;
                writeln!(out, "History cleared.")?;
                continue;
            }
            "/history" => {
                let shown = agent
                    .history()
                    .snapshot()
                    .into_iter()
                    .filter(|m| m.role != Role::System);
                for message in shown {
                    writeln!(out, "[{}] {}", message.role, message.content)?;
                }
                continue;
            }
            "/status" => {
                let state = if agent.is_available().await { "online" } else { "offline" };
                writeln!(out, "{} is {}", agent.transport().base_url(), state)?;
                continue;
            }
            _ => {}
        }

        let outcome = match agent.stream_reply(input, shape).await {
            Ok(reply) => print_reply(reply, out, interrupt()).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = outcome {
            eprintln!("error: {}", e);
        }

        if let Err(e) = store.save(session_id, &agent.history().snapshot()).await {
            error!("Failed to save session '{}': {}", session_id, e);
        }
    }

    Ok(())
}
