//! In-process OneBot forward WebSocket endpoint for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

/// How the endpoint answers each action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Reject,
    Silent,
}

pub struct ServerOptions {
    pub reply: Reply,
    /// Close the first connection after this many actions.
    pub close_first_after: Option<usize>,
    /// Hold the first handshake until this fires.
    pub gate: Option<oneshot::Receiver<()>>,
    /// Complete the handshake, then never read from the connection.
    pub stall: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            reply: Reply::Ack,
            close_first_after: None,
            gate: None,
            stall: false,
        }
    }
}

/// One action frame as seen by the endpoint.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub action: String,
    pub echo: String,
    pub params: Value,
}

impl Received {
    pub fn text(&self) -> String {
        match &self.params["message"] {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

pub struct OneBotServer {
    pub url: String,
    received: mpsc::UnboundedReceiver<Received>,
}

impl OneBotServer {
    pub async fn spawn(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut gate = options.gate;
            let mut connection = 0;
            while let Ok((tcp, _)) = listener.accept().await {
                if let Some(gate) = gate.take() {
                    let _ = gate.await;
                }
                connection += 1;
                let close_after = if connection == 1 {
                    options.close_first_after
                } else {
                    None
                };
                if options.stall {
                    tokio::spawn(stall(tcp));
                    continue;
                }
                tokio::spawn(serve(tcp, connection, options.reply, close_after, tx.clone()));
            }
        });

        Self {
            url: format!("ws://{}", addr),
            received: rx,
        }
    }

    /// Next action frame, failing the test after five seconds.
    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("no frame received within 5s")
            .expect("server stopped")
    }

    pub async fn take(&mut self, n: usize) -> Vec<Received> {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(self.next().await);
        }
        frames
    }

    /// Whether another frame arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.received.recv()).await.is_err()
    }
}

async fn stall(tcp: TcpStream) {
    let Ok(_ws) = accept_async(tcp).await else {
        return;
    };
    std::future::pending::<()>().await;
}

async fn serve(
    tcp: TcpStream,
    connection: usize,
    reply: Reply,
    close_after: Option<usize>,
    tx: mpsc::UnboundedSender<Received>,
) {
    let Ok(mut ws) = accept_async(tcp).await else {
        return;
    };

    // Implementations push meta events unprompted; the client must ignore them.
    let heartbeat = json!({"post_type": "meta_event", "meta_event_type": "lifecycle", "sub_type": "connect"});
    let _ = ws.send(Message::text(heartbeat.to_string())).await;

    let mut count = 0;
    while let Some(Ok(frame)) = ws.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let value: Value = serde_json::from_str(text.as_str()).unwrap();
        let echo = value["echo"].as_str().unwrap_or_default().to_string();
        let _ = tx.send(Received {
            connection,
            action: value["action"].as_str().unwrap_or_default().to_string(),
            echo: echo.clone(),
            params: value["params"].clone(),
        });

        let response = match reply {
            Reply::Ack => Some(json!({"status": "ok", "retcode": 0, "data": {"message_id": 1}, "echo": echo})),
            Reply::Reject => Some(json!({"status": "failed", "retcode": 100, "message": "no permission", "echo": echo})),
            Reply::Silent => None,
        };
        if let Some(response) = response {
            let _ = ws.send(Message::text(response.to_string())).await;
        }

        count += 1;
        if close_after == Some(count) {
            let _ = ws.close(None).await;
            break;
        }
    }
}
