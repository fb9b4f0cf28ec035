//! Mock laser server shared by the integration tests.
//!
//! Listens on `127.0.0.1:0`, decodes every request with the crate's own
//! [`FrameDecoder`] and answers through a scripted handler.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use solstis_link::config::{BridgeConfig, LinkConfig};
use solstis_link::protocol::{report_op, Envelope, FrameDecoder, Message, Parameters};
use solstis_link::BackendKind;

/// What the server does in answer to one request.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// Write raw bytes, after a pause.
    Bytes { after: Duration, bytes: Vec<u8> },
    /// Close the connection.
    Close,
}

impl Outgoing {
    pub fn now(bytes: Vec<u8>) -> Self {
        Outgoing::Bytes {
            after: Duration::ZERO,
            bytes,
        }
    }

    pub fn later(after: Duration, bytes: Vec<u8>) -> Self {
        Outgoing::Bytes { after, bytes }
    }
}

pub type Handler = Arc<dyn Fn(&Message) -> Vec<Outgoing> + Send + Sync>;

#[derive(Debug, Default)]
struct ServerState {
    received: Vec<Message>,
    connections: usize,
    closed: usize,
}

pub struct MockServer {
    address: String,
    state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Server answering with [`default_reply`].
    pub async fn start() -> Self {
        Self::with_handler(Arc::new(default_reply)).await
    }

    pub async fn with_handler(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.lock().unwrap().connections += 1;
                tokio::spawn(serve(socket, Arc::clone(&handler), Arc::clone(&accept_state)));
            }
        });

        Self {
            address,
            state,
            task,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn received(&self) -> Vec<Message> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn received_ops(&self) -> Vec<String> {
        self.received().into_iter().map(|m| m.op).collect()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    /// Wait until `count` connections have been closed by the client.
    pub async fn wait_closed(&self, count: usize) {
        for _ in 0..100 {
            if self.closed() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut socket: TcpStream, handler: Handler, state: Arc<Mutex<ServerState>>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    'connection: loop {
        while let Ok(Some(message)) = decoder.next_message() {
            state.lock().unwrap().received.push(message.clone());
            for outgoing in handler(&message) {
                match outgoing {
                    Outgoing::Bytes { after, bytes } => {
                        if !after.is_zero() {
                            tokio::time::sleep(after).await;
                        }
                        if socket.write_all(&bytes).await.is_err() {
                            break 'connection;
                        }
                    }
                    Outgoing::Close => break 'connection,
                }
            }
        }

        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => decoder.feed(&buf[..n]),
        }
    }

    state.lock().unwrap().closed += 1;
}

pub fn object(value: Value) -> Parameters {
    match value {
        Value::Object(map) => map,
        _ => Parameters::new(),
    }
}

/// Response frame carrying the request's id and op.
pub fn response(request: &Message, parameters: Value) -> Vec<u8> {
    frame(Message {
        transmission_id: request.transmission_id,
        op: request.op.clone(),
        parameters: object(parameters),
    })
}

/// Completion report frame for `operation`.
pub fn report(operation: &str, parameters: Value) -> Vec<u8> {
    frame(Message {
        transmission_id: None,
        op: report_op(operation),
        parameters: object(parameters),
    })
}

pub fn frame(message: Message) -> Vec<u8> {
    Envelope::new(message).to_bytes().unwrap()
}

/// `start_link` answered with "ok"; everything else with status `[0]` and,
/// when the request asked for one, its completion report.
pub fn default_reply(request: &Message) -> Vec<Outgoing> {
    if request.op == "start_link" {
        return vec![Outgoing::now(response(request, json!({"status": "ok"})))];
    }

    let mut out = vec![Outgoing::now(response(
        request,
        json!({"status": [0], "echo": request.op}),
    ))];
    if request.parameters.contains_key("report") {
        out.push(Outgoing::now(report(&request.op, json!({"report": [0]}))));
    }
    out
}

/// Configuration pointing at the given servers, with short timeouts.
pub fn config(emm: Option<&MockServer>, solstis: Option<&MockServer>) -> LinkConfig {
    let mut config = LinkConfig::new("127.0.0.1");
    config.link.default_timeout_ms = 500;
    config.link.connect_timeout_ms = 1000;
    if let Some(server) = emm {
        config = config.with_backend(BackendKind::Emm, server.address());
    }
    if let Some(server) = solstis {
        config = config.with_backend(BackendKind::Solstis, server.address());
    }
    config
}

/// Bridge that reports `127.0.0.1` and then runs `tail` (a shell snippet).
pub fn shell_bridge(tail: &str) -> BridgeConfig {
    BridgeConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), format!("echo 127.0.0.1 >&2; {tail}")],
        launch_timeout_ms: 2000,
        settle_ms: 0,
    }
}
