use crate::agent::ChatAgent;
use crate::history::SessionStore;
use crate::llm::RequestShape;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::server::ServerContext;

use chrono::Utc;
use futures::stream::{ SplitSink, SplitStream };
use futures::{ SinkExt, StreamExt };
use log::{ error, info, warn };
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio_tungstenite::{ tungstenite::protocol::Message, WebSocketStream };
use uuid::Uuid;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// Serializes and sends one message. Returns false once the client is gone.
async fn send<S>(tx: &mut WsSink<S>, peer: SocketAddr, msg: &ServerMessage) -> bool
    where S: AsyncRead + AsyncWrite + Unpin
{
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message for {}: {}", peer, e);
            return true;
        }
    };
    if let Err(e) = tx.send(Message::Text(json)).await {
        error!("Error sending message to {}: {}", peer, e);
        return false;
    }
    true
}

async fn send_error<S>(tx: &mut WsSink<S>, peer: SocketAddr, message: impl Into<String>) -> bool
    where S: AsyncRead + AsyncWrite + Unpin
{
    send(tx, peer, &(ServerMessage::Error { message: message.into() })).await
}

async fn persist(store: &dyn SessionStore, session_id: &str, agent: &ChatAgent) {
    if let Err(e) = store.save(session_id, &agent.history().snapshot()).await {
        error!("Failed to save session '{}': {}", session_id, e);
    }
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    context: Arc<ServerContext>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {}", peer);

    let (mut tx, mut rx) = websocket.split();
    let mut agent = ChatAgent::new(context.transport.clone(), context.config.clone());
    let mut session_id = Uuid::new_v4().to_string();
    info!("Assigned session ID {} to {}", session_id, peer);

    if !send(&mut tx, peer, &(ServerMessage::Session { session_id: session_id.clone() })).await {
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds size limit ({} > {})",
                peer,
                message.len(),
                MAX_MESSAGE_SIZE
            );
            send_error(&mut tx, peer, "Message too large").await;
            break;
        }

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Ping(ping_data) => {
                if tx.send(Message::Pong(ping_data)).await.is_err() {
                    error!("Failed to send pong to {}", peer);
                    break;
                }
                continue;
            }
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
                continue;
            }
            Message::Pong(_) | Message::Frame(_) => {
                continue;
            }
        };

        let request = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to parse message from {}: {}", peer, e);
                if !send_error(&mut tx, peer, format!("Failed to parse message: {}", e)).await {
                    break;
                }
                continue;
            }
        };

        let open = match request {
            ClientMessage::Chat { content, generate } => {
                let open = relay_reply(&mut agent, &content, RequestShape::from_generate_flag(generate), &mut tx, &mut rx, peer).await;
                persist(context.store.as_ref(), &session_id, &agent).await;
                open
            }
            ClientMessage::Preset { name, text, language } => {
                match context.prompts.render(&name, &text, language.as_deref()) {
                    Ok(input) => {
                        let open = relay_reply(&mut agent, &input, RequestShape::Chat, &mut tx, &mut rx, peer).await;
                        persist(context.store.as_ref(), &session_id, &agent).await;
                        open
                    }
                    Err(e) => send_error(&mut tx, peer, e.to_string()).await,
                }
            }
            ClientMessage::Cancel => send_error(&mut tx, peer, "No reply in progress").await,
            ClientMessage::Reset => {
                agent.reset();
                if let Err(e) = context.store.clear(&session_id).await {
                    error!("Failed to clear session '{}': {}", session_id, e);
                }
                send(&mut tx, peer, &(ServerMessage::History { messages: Vec::new() })).await
            }
            ClientMessage::Resume { session_id: requested } => {
                match context.store.load(&requested).await {
                    Ok(messages) => {
                        info!("{} resumed session {} ({} messages)", peer, requested, messages.len());
                        agent.restore(messages);
                        session_id = requested;
                        send(&mut tx, peer, &(ServerMessage::Session { session_id: session_id.clone() })).await &&
                            send(&mut tx, peer, &(ServerMessage::History { messages: agent.history().snapshot() })).await
                    }
                    Err(e) => send_error(&mut tx, peer, e.to_string()).await,
                }
            }
            ClientMessage::Status => {
                let available = agent.is_available().await;
                send(&mut tx, peer, &(ServerMessage::Status { available })).await
            }
        };

        if !open {
            break;
        }
    }

    info!("WebSocket connection closed for {} (session {})", peer, session_id);
}

/// Streams one reply to the client while watching for a cancel request.
///
/// Returns false if the connection is gone.
async fn relay_reply<S>(
    agent: &mut ChatAgent,
    input: &str,
    shape: RequestShape,
    tx: &mut WsSink<S>,
    rx: &mut WsSource<S>,
    peer: SocketAddr
) -> bool
    where S: AsyncRead + AsyncWrite + Unpin
{
    let mut reply = match agent.stream_reply(input, shape).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Reply for {} failed: {}", peer, e);
            return send_error(tx, peer, e.to_string()).await;
        }
    };

    loop {
        tokio::select! {
            fragment = reply.next() => {
                match fragment {
                    Some(Ok(content)) => {
                        if !send(tx, peer, &(ServerMessage::Fragment { content })).await {
                            return false;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Reply for {} failed mid-stream: {}", peer, e);
                        return send_error(tx, peer, e.to_string()).await;
                    }
                    None => {
                        let done = ServerMessage::Done {
                            content: reply.text().to_string(),
                            timestamp: Utc::now().timestamp(),
                        };
                        return send(tx, peer, &done).await;
                    }
                }
            }
            incoming = rx.next() => {
                match incoming {
                    Some(Ok(message)) if message.len() > MAX_MESSAGE_SIZE => {
                        warn!(
                            "Message from {} exceeds size limit during a reply ({} > {})",
                            peer,
                            message.len(),
                            MAX_MESSAGE_SIZE
                        );
                        reply.cancel();
                        send_error(tx, peer, "Message too large").await;
                        return false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Cancel) => {
                                let partial = reply.cancel();
                                return send(tx, peer, &(ServerMessage::Cancelled { partial })).await;
                            }
                            Ok(_) => {
                                if !send_error(tx, peer, "A reply is already streaming; send cancel first").await {
                                    return false;
                                }
                            }
                            Err(e) => {
                                if !send_error(tx, peer, format!("Failed to parse message: {}", e)).await {
                                    return false;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(ping_data))) => {
                        if tx.send(Message::Pong(ping_data)).await.is_err() {
                            return false;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        let partial = reply.cancel();
                        info!("{} left during a reply, dropped {} byte(s)", peer, partial.len());
                        return false;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
