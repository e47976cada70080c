//! Hand-driven Ollama stand-in for tests that need control over the connection itself.
#![allow(dead_code)]

use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::net::{ TcpListener, TcpStream };
use tokio::sync::oneshot;

/// What the server does after sending the first record.
pub enum AfterFirstRecord {
    /// Keep the connection open until the client closes it.
    Hold,
    /// Close the connection without finishing the chunked body.
    HangUp,
}

async fn read_request(socket: &mut TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => {
                return;
            }
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
        let Some(head_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if request.len() >= head_end + 4 + body_len {
            return;
        }
    }
}

/// Serves a single streaming request: the response head plus `first_record` as one chunk,
/// then behaves per `after`. The receiver fires once the connection is closed.
pub async fn chunked_ollama(
    first_record: &'static str,
    after: AfterFirstRecord
) -> (String, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        read_request(&mut socket).await;

        let line = format!("{}\n", first_record);
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
            line.len(),
            line
        );
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.flush().await;

        match after {
            AfterFirstRecord::HangUp => {
                let _ = socket.shutdown().await;
            }
            AfterFirstRecord::Hold => {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => {
                            break;
                        }
                        Ok(_) => {}
                    }
                }
            }
        }
        let _ = closed_tx.send(());
    });

    (format!("http://{}", addr), closed_rx)
}
