//! # Session Controller
//!
//! Decides whether monitoring should run and owns the start/stop lifecycle
//! of the [`StreamingClient`] and the [`ProcessorTimer`].
//!
//! ## State Machine
//!
//! ```text
//!            start (token ok, validated, connected)
//!  Stopped ──► Connecting ──────────────────────────► Streaming
//!     ▲            │ missing/invalid token,                │
//!     │            │ connect failure, cancelled            │ connection lost
//!     │            ▼                                       ▼
//!     └─────────── Stopped ◄──────── cleanup ◄──────── Faulted
//!                     ▲                                    │
//!                     └──────────── stop() ◄───────────────┘ (from any state)
//! ```
//!
//! Transitions are serialized by a lifecycle mutex. [`SessionController::stop`]
//! first fires the cancellation token without taking that mutex, so a stop
//! issued while a start is still connecting aborts the start instead of
//! waiting behind it.
//!
//! ## Driving the Controller
//!
//! [`SessionController::run`] listens to [`SharedState`] change notifications
//! and to receive-loop exits, and starts or stops the session as
//! `enabled`, `in_vr`, the per-context flags and the token change:
//!
//! ```no_run
//! use pulsoid_hr::{PulsoidConfig, SessionController, SharedState};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> pulsoid_hr::PulsoidResult<()> {
//! let config = PulsoidConfig::discover(None)?;
//! let state = SharedState::new(config.monitor.clone());
//! let controller = SessionController::new(&config, state.clone())?;
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         shutdown.cancel();
//!     }
//! });
//!
//! state.update_settings(|s| s.enabled = true);
//! controller.run(shutdown).await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::auth::TokenBroker;
use crate::config::PulsoidConfig;
use crate::error::{PulsoidError, PulsoidResult};
use crate::processing::SignalProcessor;
use crate::sample::RawSampleSlot;
use crate::state::{SharedState, StateField};
use crate::stream::{StreamEnd, StreamExit, StreamingClient};
use crate::timer::ProcessorTimer;

/// Buffer for receive-loop exit reports.
const EXIT_CHANNEL_BUFFER: usize = 8;

/// Lifecycle state of a monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    /// Validating the token and opening the stream.
    Connecting,
    /// Stream open, processor ticking.
    Streaming,
    /// The stream was lost; cleanup in progress.
    Faulted,
}

impl SessionState {
    /// `true` while a session holds (or is acquiring) resources.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Streaming)
    }
}

/// Resources owned by one session.
struct Lifecycle {
    stream: StreamingClient,
    timer: Option<ProcessorTimer>,
}

/// Owns the monitoring session lifecycle.
pub struct SessionController {
    state: SharedState,
    slot: Arc<RawSampleSlot>,
    broker: TokenBroker,
    lifecycle: Mutex<Lifecycle>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
    status: watch::Sender<SessionState>,
    exits: Mutex<mpsc::Receiver<StreamExit>>,
}

impl SessionController {
    /// Create a controller using a [`TokenBroker`] built from `config`.
    pub fn new(config: &PulsoidConfig, state: SharedState) -> PulsoidResult<Self> {
        let broker = TokenBroker::new(config)?;
        Ok(Self::with_broker(config, state, broker))
    }

    /// Create a controller with an existing broker (used for validation only).
    pub fn with_broker(config: &PulsoidConfig, state: SharedState, broker: TokenBroker) -> Self {
        let slot = Arc::new(RawSampleSlot::new());
        let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_BUFFER);

        let mut stream = StreamingClient::new(config, state.clone(), Arc::clone(&slot));
        stream.set_exit_notifier(exit_tx);

        let (status, _) = watch::channel(SessionState::Stopped);

        Self {
            state,
            slot,
            broker,
            lifecycle: Mutex::new(Lifecycle {
                stream,
                timer: None,
            }),
            cancel: std::sync::Mutex::new(None),
            status,
            exits: Mutex::new(exit_rx),
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionState {
        *self.status.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe()
    }

    /// The shared state this controller reads and writes.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// The slot the receive loop publishes into.
    pub fn slot(&self) -> &Arc<RawSampleSlot> {
        &self.slot
    }

    // ─── Transitions ────────────────────────────────────────────────────

    /// `Stopped → Connecting → Streaming`.
    ///
    /// No-op while a session is already connecting or streaming. On failure
    /// the user-facing error is raised in [`SharedState`] and the session
    /// returns to [`SessionState::Stopped`].
    pub async fn start(&self) -> PulsoidResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.status().is_active() {
            tracing::debug!(status = ?self.status(), "Session already active");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.cancel_slot() = Some(cancel.clone());
        self.set_status(SessionState::Connecting);

        match self.open(&mut lifecycle, &cancel).await {
            Ok(()) => {
                self.set_status(SessionState::Streaming);
                tracing::info!("Heart-rate session streaming");
                Ok(())
            }
            Err(e) => {
                self.take_cancel();
                Self::release(&mut lifecycle, &self.slot).await;
                if matches!(e, PulsoidError::Cancelled) {
                    tracing::info!("Session start cancelled");
                } else {
                    tracing::warn!(error = %e, "Heart-rate session failed to start");
                    self.state.set_access_error(e.user_message());
                }
                self.set_status(SessionState::Stopped);
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        lifecycle: &mut Lifecycle,
        cancel: &CancellationToken,
    ) -> PulsoidResult<()> {
        let settings = self.state.settings();
        let token = settings
            .token()
            .ok_or(PulsoidError::MissingToken)?
            .to_string();

        let valid = tokio::select! {
            () = cancel.cancelled() => return Err(PulsoidError::Cancelled),
            result = self.broker.validate(&token) => match result {
                Ok(valid) => valid,
                Err(e) => {
                    tracing::warn!(error = %e, "Token validation request failed");
                    false
                }
            },
        };
        if !valid {
            return Err(PulsoidError::InvalidToken);
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(PulsoidError::Cancelled),
            result = lifecycle.stream.connect(&token, cancel.child_token()) => result?,
        }

        let processor = SignalProcessor::new(self.state.clone(), Arc::clone(&self.slot));
        lifecycle.timer = Some(ProcessorTimer::start(processor, &self.state));
        Ok(())
    }

    /// `* → Stopped`.
    ///
    /// Cancels the receive loop, waits for it, closes the socket, stops the
    /// timer and clears the access error. Returns once nothing is left
    /// running. Does nothing when already stopped.
    pub async fn stop(&self) {
        if let Some(cancel) = self.take_cancel() {
            cancel.cancel();
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if self.status() == SessionState::Stopped {
            return;
        }

        Self::release(&mut lifecycle, &self.slot).await;
        self.state.update_outputs(|o| o.device_online = false);
        self.state.clear_access_error();
        self.set_status(SessionState::Stopped);
        tracing::info!("Heart-rate session stopped");
    }

    /// Re-evaluate after a change to `field`.
    pub async fn handle_change(&self, field: StateField) -> PulsoidResult<()> {
        if !field.affects_session() {
            return Ok(());
        }

        if self.state.settings().should_run() {
            if field == StateField::AccessToken && self.status().is_active() {
                tracing::info!("Access token changed, restarting session");
                self.stop().await;
            }
            self.start().await
        } else {
            self.stop().await;
            Ok(())
        }
    }

    /// React to a receive-loop exit.
    pub async fn handle_stream_exit(&self, exit: StreamExit) {
        let reason = match exit.end {
            StreamEnd::Cancelled => return,
            StreamEnd::ClosedByServer => "Connection closed by server".to_string(),
            StreamEnd::Dropped(reason) => reason,
        };

        let mut lifecycle = self.lifecycle.lock().await;
        if self.status() != SessionState::Streaming
            || exit.connection_id != lifecycle.stream.connection_id()
        {
            return;
        }

        self.set_status(SessionState::Faulted);
        if let Some(cancel) = self.take_cancel() {
            cancel.cancel();
        }
        Self::release(&mut lifecycle, &self.slot).await;

        let error = PulsoidError::ConnectionDropped { reason };
        tracing::warn!(error = %error, "Heart-rate session lost its stream");
        self.state.update_outputs(|o| o.device_online = false);
        self.state.set_access_error(error.user_message());
        self.set_status(SessionState::Stopped);
    }

    /// Drive the session from state changes until `shutdown` fires, then stop.
    ///
    /// Evaluates the current settings once on entry.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut changes = self.state.subscribe();
        let mut exits = self.exits.lock().await;

        self.evaluate().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(field) => {
                        if let Err(e) = self.handle_change(field).await {
                            tracing::debug!(error = %e, ?field, "Session change not applied");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "State notifications lagged, re-evaluating");
                        self.evaluate().await;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(exit) = exits.recv() => self.handle_stream_exit(exit).await,
            }
        }

        self.stop().await;
    }

    async fn evaluate(&self) {
        let result = if self.state.settings().should_run() {
            self.start().await
        } else {
            self.stop().await;
            Ok(())
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Session not started");
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    async fn release(lifecycle: &mut Lifecycle, slot: &RawSampleSlot) {
        lifecycle.stream.disconnect().await;
        if let Some(mut timer) = lifecycle.timer.take() {
            timer.stop().await;
        }
        slot.clear();
    }

    fn set_status(&self, next: SessionState) {
        let prev = self.status.send_replace(next);
        if prev != next {
            tracing::debug!(?prev, ?next, "Session state changed");
        }
    }

    fn cancel_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_cancel(&self) -> Option<CancellationToken> {
        self.cancel_slot().take()
    }
}
