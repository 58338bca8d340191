//! Shared utilities for relay integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use sse_relay::{RelayConfig, RelayServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// How the mock upstream answers each connection.
#[derive(Clone)]
#[allow(dead_code)]
pub enum UpstreamScript {
    /// 200 event stream: write each chunk with a pause, then close.
    Stream(Vec<&'static str>),
    /// Non-success status with a plain body.
    Reject { status: &'static str, body: &'static str },
    /// Chunked 200 that dies mid-body after one chunk.
    Truncated(&'static str),
    /// 200 event stream that stays open until the relay hangs up.
    Hold,
}

/// A running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    /// Raw request head (request line + headers) of each connection.
    pub requests: mpsc::UnboundedReceiver<String>,
    /// One message per `Hold` connection closed by the relay.
    #[allow(dead_code)]
    pub disconnects: mpsc::UnboundedReceiver<()>,
}

const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";

/// Start a scripted upstream on an ephemeral port.
pub async fn start_upstream(script: UpstreamScript) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (request_tx, requests) = mpsc::unbounded_channel();
    let (disconnect_tx, disconnects) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let script = script.clone();
            let request_tx = request_tx.clone();
            let disconnect_tx = disconnect_tx.clone();
            tokio::spawn(async move {
                serve(socket, script, request_tx, disconnect_tx).await;
            });
        }
    });

    MockUpstream {
        addr,
        requests,
        disconnects,
    }
}

async fn serve(
    mut socket: TcpStream,
    script: UpstreamScript,
    request_tx: mpsc::UnboundedSender<String>,
    disconnect_tx: mpsc::UnboundedSender<()>,
) {
    let Some(head) = read_head(&mut socket).await else {
        return;
    };
    let _ = request_tx.send(head);

    match script {
        UpstreamScript::Stream(chunks) => {
            let _ = socket.write_all(SSE_HEAD.as_bytes()).await;
            for chunk in chunks {
                let _ = socket.write_all(chunk.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = socket.shutdown().await;
        }
        UpstreamScript::Reject { status, body } => {
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        UpstreamScript::Truncated(chunk) => {
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
                chunk.len(),
                chunk
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Close without the terminating zero-length chunk.
            drop(socket);
        }
        UpstreamScript::Hold => {
            let _ = socket.write_all(SSE_HEAD.as_bytes()).await;
            let mut buf = [0u8; 256];
            // The relay never sends a body; EOF means it dropped the connection.
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            let _ = disconnect_tx.send(());
        }
    }
}

async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

/// Start the relay on an ephemeral port, talking plain HTTP upstream.
pub async fn start_relay(mut config: RelayConfig) -> (SocketAddr, Shutdown) {
    config.upstream.scheme = "http".into();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = RelayServer::new(config, shutdown.clone()).unwrap();

    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    (addr, shutdown)
}

/// Downstream client that never goes through an environment proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Relay URL for a conversation on the given upstream.
pub fn relay_url(relay: SocketAddr, upstream: SocketAddr, extra: &str) -> String {
    format!(
        "http://{}/sse-proxy?scrtUrl={}&conversationId=AbC-DeF&orgId=org-1&accessToken=tok-1{}",
        relay, upstream, extra
    )
}
