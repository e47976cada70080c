//! WebSocket relay driven end to end with a tungstenite client.

mod common;

use common::{ chunked_ollama, AfterFirstRecord };
use futures::{ SinkExt, StreamExt };
use ollama_chat::config::prompt::PromptConfig;
use ollama_chat::config::{ ClientConfig, RequestConfig };
use ollama_chat::history::{ MemorySessionStore, SessionStore };
use ollama_chat::llm::OllamaTransport;
use ollama_chat::models::chat::ChatMessage;
use ollama_chat::models::websocket::{ ClientMessage, ServerMessage };
use ollama_chat::server::{ serve, ServerContext };
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{ TcpListener, TcpStream };
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{ MaybeTlsStream, WebSocketStream };
use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay(ollama_uri: &str, store: Arc<MemorySessionStore>) -> SocketAddr {
    let context = Arc::new(ServerContext {
        transport: OllamaTransport::new(&ClientConfig::new(ollama_uri)).unwrap(),
        config: RequestConfig::default(),
        store,
        prompts: Arc::new(PromptConfig::default()),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, context));
    addr
}

async fn connect(addr: SocketAddr) -> (Client, String) {
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await.unwrap();
    match receive(&mut client).await {
        ServerMessage::Session { session_id } => (client, session_id),
        other => panic!("expected a session message first, got {:?}", other),
    }
}

async fn send(client: &mut Client, msg: ClientMessage) {
    client.send(Message::Text(serde_json::to_string(&msg).unwrap())).await.unwrap();
}

async fn receive(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next()).await
            .expect("relay answered in time")
            .expect("connection open")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn mock_ollama() -> MockServer {
    let mock_server = MockServer::start().await;
    let body = format!(
        "{}\n{}\n{}\n",
        json!({ "message": { "role": "assistant", "content": "He" }, "done": false }),
        json!({ "message": { "role": "assistant", "content": "llo" }, "done": false }),
        json!({ "done": true })
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&mock_server).await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&mock_server).await;
    mock_server
}

#[tokio::test]
async fn relays_fragments_and_persists_the_turn() {
    let ollama = mock_ollama().await;
    let store = Arc::new(MemorySessionStore::new(20));
    let addr = start_relay(&ollama.uri(), store.clone()).await;
    let (mut client, session_id) = connect(addr).await;

    send(&mut client, ClientMessage::Chat { content: "hi".into(), generate: false }).await;

    assert_eq!(receive(&mut client).await, ServerMessage::Fragment { content: "He".into() });
    assert_eq!(receive(&mut client).await, ServerMessage::Fragment { content: "llo".into() });
    match receive(&mut client).await {
        ServerMessage::Done { content, timestamp } => {
            assert_eq!(content, "Hello");
            assert!(timestamp > 0);
        }
        other => panic!("expected done, got {:?}", other),
    }

    // The turn is saved before the next message is handled.
    send(&mut client, ClientMessage::Status).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Status { available: true });

    assert_eq!(
        store.load(&session_id).await.unwrap(),
        vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello")]
    );
}

#[tokio::test]
async fn resume_and_reset_a_session() {
    let ollama = mock_ollama().await;
    let store = Arc::new(MemorySessionStore::new(20));
    store.save("tab-1", &[ChatMessage::user("earlier"), ChatMessage::assistant("reply")]).await.unwrap();
    let addr = start_relay(&ollama.uri(), store.clone()).await;
    let (mut client, _) = connect(addr).await;

    send(&mut client, ClientMessage::Resume { session_id: "tab-1".into() }).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Session { session_id: "tab-1".into() });
    assert_eq!(receive(&mut client).await, ServerMessage::History {
        messages: vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")],
    });

    send(&mut client, ClientMessage::Reset).await;
    assert_eq!(receive(&mut client).await, ServerMessage::History { messages: vec![] });
    assert!(store.load("tab-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_requests_get_error_messages() {
    let ollama = mock_ollama().await;
    let addr = start_relay(&ollama.uri(), Arc::new(MemorySessionStore::new(20))).await;
    let (mut client, _) = connect(addr).await;

    client.send(Message::Text("{\"type\":\"shout\"}".into())).await.unwrap();
    assert!(matches!(receive(&mut client).await, ServerMessage::Error { .. }));

    send(&mut client, ClientMessage::Cancel).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Error {
        message: "No reply in progress".into(),
    });

    send(&mut client, ClientMessage::Preset {
        name: "limerick".into(),
        text: "cats".into(),
        language: None,
    }).await;
    assert!(matches!(receive(&mut client).await, ServerMessage::Error { .. }));
}

const ONCE: &str = r#"{"message":{"role":"assistant","content":"Once"},"done":false}"#;

#[tokio::test]
async fn cancel_stops_a_reply_in_flight() {
    let (ollama, ollama_closed) = chunked_ollama(ONCE, AfterFirstRecord::Hold).await;
    let addr = start_relay(&ollama, Arc::new(MemorySessionStore::new(20))).await;
    let (mut client, session_id) = connect(addr).await;

    send(&mut client, ClientMessage::Chat { content: "tell me a story".into(), generate: false }).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Fragment { content: "Once".into() });

    send(&mut client, ClientMessage::Chat { content: "and another".into(), generate: false }).await;
    assert!(matches!(receive(&mut client).await, ServerMessage::Error { .. }));

    send(&mut client, ClientMessage::Cancel).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Cancelled { partial: "Once".into() });
    tokio::time::timeout(Duration::from_secs(5), ollama_closed).await
        .expect("upstream connection should be closed")
        .unwrap();

    // The partial reply is not part of the saved session.
    send(&mut client, ClientMessage::Resume { session_id: session_id.clone() }).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Session { session_id });
    assert_eq!(receive(&mut client).await, ServerMessage::History {
        messages: vec![ChatMessage::user("tell me a story")],
    });
}

#[tokio::test]
async fn oversized_frame_during_a_reply_drops_the_client() {
    let (ollama, ollama_closed) = chunked_ollama(ONCE, AfterFirstRecord::Hold).await;
    let addr = start_relay(&ollama, Arc::new(MemorySessionStore::new(20))).await;
    let (mut client, _) = connect(addr).await;

    send(&mut client, ClientMessage::Chat { content: "tell me a story".into(), generate: false }).await;
    assert_eq!(receive(&mut client).await, ServerMessage::Fragment { content: "Once".into() });

    client.send(Message::Text("x".repeat(1024 * 1024 + 1))).await.unwrap();
    assert_eq!(receive(&mut client).await, ServerMessage::Error {
        message: "Message too large".into(),
    });

    let next = tokio::time::timeout(Duration::from_secs(5), client.next()).await
        .expect("relay should hang up");
    assert!(!matches!(next, Some(Ok(Message::Text(_)))), "got {:?}", next);
    tokio::time::timeout(Duration::from_secs(5), ollama_closed).await
        .expect("upstream connection should be closed")
        .unwrap();
}
