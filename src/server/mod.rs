pub mod websocket;

use crate::config::prompt::PromptConfig;
use crate::config::RequestConfig;
use crate::history::SessionStore;
use crate::llm::OllamaTransport;

use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared by every connection; each connection builds its own conversation from it.
pub struct ServerContext {
    pub transport: OllamaTransport,
    pub config: RequestConfig,
    pub store: Arc<dyn SessionStore>,
    pub prompts: Arc<PromptConfig>,
}

pub struct Server {
    addr: String,
    context: Arc<ServerContext>,
}

impl Server {
    pub fn new(addr: String, context: Arc<ServerContext>) -> Self {
        Self { addr, context }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("WS server listening on: {}", listener.local_addr()?);
        serve(listener, self.context.clone()).await
    }
}

/// Accepts connections on `listener` until it fails.
pub async fn serve(
    listener: TcpListener,
    context: Arc<ServerContext>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let context = context.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(websocket) => websocket::handle_connection(peer, websocket, context).await,
                Err(e) => warn!("WebSocket handshake with {} failed: {}", peer, e),
            }
        });
    }
}
