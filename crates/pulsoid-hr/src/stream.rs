//! # Real-Time Heart-Rate Stream
//!
//! [`StreamingClient`] owns one authenticated WebSocket to the Pulsoid
//! real-time endpoint. The socket is split into reader/writer halves with
//! `futures_util::StreamExt::split()`; the reader runs in a spawned task and
//! publishes every decoded value into the shared [`RawSampleSlot`]:
//!
//! ```text
//! StreamingClient
//!   writer: Arc<Mutex<SplitSink>>   ◄── disconnect()
//!
//!   receive loop (spawned task), select! on:
//!     cancelled       → StreamEnd::Cancelled
//!     Text / Binary   → parse → RawSampleSlot
//!     Close           → StreamEnd::ClosedByServer
//!     error / EOF     → StreamEnd::Dropped
//! ```
//!
//! The client never reconnects on its own. How the loop ended is reported
//! as a [`StreamExit`] to whoever registered with [`StreamingClient::set_exit_notifier`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::PulsoidConfig;
use crate::error::{PulsoidError, PulsoidResult};
use crate::protocol::parse_heart_rate;
use crate::sample::RawSampleSlot;
use crate::state::SharedState;

/// Bound on flushing the reply to a server close frame.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Type alias for the write half of the WebSocket connection.
type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Type alias for the read half of the WebSocket connection.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Why the receive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The server sent a close frame.
    ClosedByServer,
    /// Read error or the socket ended without a close frame.
    Dropped(String),
}

/// Loop exit report, tagged with the connection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamExit {
    pub connection_id: u64,
    pub end: StreamEnd,
}

/// WebSocket client for the real-time heart-rate feed.
pub struct StreamingClient {
    url: String,
    connect_timeout: Duration,
    disconnect_timeout: Duration,

    state: SharedState,
    slot: Arc<RawSampleSlot>,

    /// Shared write half, present while connected.
    writer: Option<Arc<Mutex<WsWriter>>>,

    /// Handle to the receive loop task.
    reader_handle: Option<JoinHandle<()>>,

    /// Cancellation for the current receive loop.
    cancel: Option<CancellationToken>,

    exit_tx: Option<mpsc::Sender<StreamExit>>,
    connection_id: u64,
}

impl StreamingClient {
    pub fn new(config: &PulsoidConfig, state: SharedState, slot: Arc<RawSampleSlot>) -> Self {
        Self {
            url: config.endpoints.stream_url.clone(),
            connect_timeout: Duration::from_secs(config.timeouts.connect_timeout_secs),
            disconnect_timeout: Duration::from_secs(config.timeouts.disconnect_timeout_secs),
            state,
            slot,
            writer: None,
            reader_handle: None,
            cancel: None,
            exit_tx: None,
            connection_id: 0,
        }
    }

    /// Register a channel that receives a [`StreamExit`] whenever a receive
    /// loop ends.
    pub fn set_exit_notifier(&mut self, tx: mpsc::Sender<StreamExit>) {
        self.exit_tx = Some(tx);
    }

    /// Identifier of the most recent connection, as used in [`StreamExit`].
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Open the stream with `token` as bearer credential and start the
    /// receive loop. Any previous connection is closed first.
    ///
    /// The loop ends when `cancel` fires, the server closes, or the socket
    /// fails. There is no automatic retry.
    pub async fn connect(&mut self, token: &str, cancel: CancellationToken) -> PulsoidResult<()> {
        self.disconnect().await;

        let connect_error = |reason: String| PulsoidError::StreamConnect {
            url: self.url.clone(),
            reason,
        };

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_error(format!("Invalid URL: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| connect_error(format!("Invalid token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| PulsoidError::Timeout {
                    seconds: self.connect_timeout.as_secs(),
                })?
                .map_err(|e| connect_error(e.to_string()))?;

        tracing::info!(url = %self.url, status = %response.status(), "Connected to heart-rate stream");

        self.state.clear_access_error();

        let (writer, reader) = ws.split();
        self.connection_id += 1;

        let handle = spawn_receive_loop(
            reader,
            ReceiveContext {
                connection_id: self.connection_id,
                cancel: cancel.clone(),
                state: self.state.clone(),
                slot: Arc::clone(&self.slot),
                exit_tx: self.exit_tx.clone(),
            },
        );

        self.writer = Some(Arc::new(Mutex::new(writer)));
        self.reader_handle = Some(handle);
        self.cancel = Some(cancel);
        Ok(())
    }

    /// Returns whether the receive loop is still running.
    pub fn is_connected(&self) -> bool {
        self.reader_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the receive loop and close the socket.
    ///
    /// Safe to call repeatedly and without a connection.
    pub async fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        if let Some(handle) = self.reader_handle.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.disconnect_timeout, handle)
                .await
                .is_err()
            {
                tracing::warn!("Receive loop did not exit in time, aborting");
                abort.abort();
            }
        }

        if let Some(writer) = self.writer.take() {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "Close on already-closed stream");
            }
            tracing::info!("Heart-rate stream disconnected");
        }
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
    }
}

struct ReceiveContext {
    connection_id: u64,
    cancel: CancellationToken,
    state: SharedState,
    slot: Arc<RawSampleSlot>,
    exit_tx: Option<mpsc::Sender<StreamExit>>,
}

fn spawn_receive_loop(mut reader: WsReader, ctx: ReceiveContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let end = loop {
            let msg = tokio::select! {
                () = ctx.cancel.cancelled() => break StreamEnd::Cancelled,
                msg = reader.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => handle_frame(&ctx, text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => handle_frame(&ctx, text),
                    Err(e) => tracing::warn!(error = %e, "Discarding non-UTF-8 frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Heart-rate stream closed by server");
                    // Polling once more flushes the queued close reply.
                    let _ = tokio::time::timeout(CLOSE_ACK_TIMEOUT, reader.next()).await;
                    break StreamEnd::ClosedByServer;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    break StreamEnd::Dropped(e.to_string());
                }
                None => {
                    tracing::info!("Heart-rate stream ended");
                    break StreamEnd::Dropped("connection closed without a close frame".into());
                }
                _ => {
                    // Ping, pong, raw frames
                }
            }
        };

        tracing::debug!(connection_id = ctx.connection_id, ?end, "Receive loop exiting");
        if let Some(tx) = &ctx.exit_tx {
            let _ = tx.try_send(StreamExit {
                connection_id: ctx.connection_id,
                end,
            });
        }
    })
}

fn handle_frame(ctx: &ReceiveContext, text: &str) {
    let arrived_at = Instant::now();
    let mut heart_rate = match parse_heart_rate(text) {
        Ok(hr) => hr,
        Err(e) => {
            tracing::warn!(error = %e, "Discarding heart-rate frame");
            return;
        }
    };

    let settings = ctx.state.settings();
    if settings.adjustment_enabled {
        heart_rate = heart_rate.saturating_add(settings.adjustment);
    }

    tracing::debug!(heart_rate, "Received heart-rate sample");
    ctx.slot.publish(heart_rate, arrived_at);
}
