#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

pub const VALIDATE_PATH: &str = "/api/v1/token/validate";

enum ConnectionCommand {
    SendText(String),
    Close,
    Drop,
}

/// Server side of one accepted WebSocket.
pub struct MockConnection {
    authorization: Option<String>,
    command_tx: mpsc::Sender<ConnectionCommand>,
    closed_rx: mpsc::Receiver<()>,
}

impl MockConnection {
    /// `Authorization` header sent with the upgrade request.
    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.command_tx
            .send(ConnectionCommand::SendText(text.into()))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn push_heart_rate(&self, heart_rate: i64) {
        self.send_text(
            json!({
                "measured_at": 1_700_000_000_000_i64,
                "data": { "heart_rate": heart_rate }
            })
            .to_string(),
        )
        .await;
    }

    /// Send a close frame.
    pub async fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Close).await;
    }

    /// Drop the TCP connection without a close frame.
    pub async fn drop_connection(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Drop).await;
    }

    /// Wait until the client closed its side.
    pub async fn wait_closed(&mut self) {
        timeout(STEP_TIMEOUT, self.closed_rx.recv())
            .await
            .expect("timed out waiting for client close");
    }
}

#[derive(Clone)]
struct ValidateState {
    status: Arc<AtomicU16>,
    authorization: Arc<Mutex<Option<String>>>,
}

async fn validate(State(state): State<ValidateState>, headers: HeaderMap) -> StatusCode {
    let authorization = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *state.authorization.lock().unwrap() = authorization;
    StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap()
}

/// In-process stand-in for the Pulsoid real-time and validation endpoints.
pub struct MockPulsoidServer {
    ws_addr: SocketAddr,
    http_addr: SocketAddr,
    connection_rx: mpsc::Receiver<MockConnection>,
    validate_status: Arc<AtomicU16>,
    validate_authorization: Arc<Mutex<Option<String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockPulsoidServer {
    pub async fn start() -> std::io::Result<Self> {
        let ws_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let ws_addr = ws_listener.local_addr()?;
        let http_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let http_addr = http_listener.local_addr()?;

        let (connection_tx, connection_rx) = mpsc::channel(16);

        let ws_task = tokio::spawn(async move {
            loop {
                let (stream, _) = match ws_listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let connection_tx = connection_tx.clone();

                tokio::spawn(async move {
                    let mut authorization = None;
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        authorization = req
                            .headers()
                            .get(http::header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        Ok(resp)
                    };
                    let ws_stream = match accept_hdr_async(stream, callback).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };

                    let (mut ws_sink, mut ws_source) = ws_stream.split();
                    let (command_tx, mut command_rx) = mpsc::channel(64);
                    let (closed_tx, closed_rx) = mpsc::channel(1);

                    let connection = MockConnection {
                        authorization,
                        command_tx,
                        closed_rx,
                    };
                    if connection_tx.send(connection).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            maybe_command = command_rx.recv() => match maybe_command {
                                Some(ConnectionCommand::SendText(text)) => {
                                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(ConnectionCommand::Close) => {
                                    let _ = ws_sink.send(Message::Close(None)).await;
                                }
                                Some(ConnectionCommand::Drop) | None => return,
                            },
                            maybe_message = ws_source.next() => match maybe_message {
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                                    let _ = closed_tx.try_send(());
                                    break;
                                }
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        let validate_status = Arc::new(AtomicU16::new(200));
        let validate_authorization = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(VALIDATE_PATH, get(validate))
            .with_state(ValidateState {
                status: Arc::clone(&validate_status),
                authorization: Arc::clone(&validate_authorization),
            });
        let http_task = tokio::spawn(async move {
            let _ = axum::serve(http_listener, app).await;
        });

        Ok(Self {
            ws_addr,
            http_addr,
            connection_rx,
            validate_status,
            validate_authorization,
            tasks: vec![ws_task, http_task],
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/data/real_time", self.ws_addr)
    }

    pub fn validate_url(&self) -> String {
        format!("http://{}{}", self.http_addr, VALIDATE_PATH)
    }

    /// Status returned by the validation endpoint from now on.
    pub fn set_validate_status(&self, status: u16) {
        self.validate_status.store(status, Ordering::SeqCst);
    }

    /// `Authorization` header of the last validation request.
    pub fn last_validate_authorization(&self) -> Option<String> {
        self.validate_authorization.lock().unwrap().clone()
    }

    pub async fn accept_connection(&mut self) -> MockConnection {
        timeout(STEP_TIMEOUT, self.connection_rx.recv())
            .await
            .expect("timed out waiting for client connection")
            .expect("mock server connection channel closed")
    }

    pub async fn try_accept_connection(&mut self, wait: Duration) -> Option<MockConnection> {
        match timeout(wait, self.connection_rx.recv()).await {
            Ok(Some(connection)) => Some(connection),
            _ => None,
        }
    }
}

impl Drop for MockPulsoidServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Poll `check` until it returns `true` or [`STEP_TIMEOUT`] elapses.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
