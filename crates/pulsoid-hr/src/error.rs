//! # Error Types
//!
//! Semantic error types for the heart-rate telemetry pipeline. Every variant
//! carries enough context to diagnose the problem without digging through logs.
//!
//! ## Failure Classes
//!
//! | Class | Variants | Outcome |
//! |-------|----------|---------|
//! | Authentication setup | `ListenerBind`, `ExchangeTimeout`, `ListenersNotStarted` | surfaced to the user |
//! | Streaming | `StreamConnect`, `ConnectionDropped` | session moves to `Stopped` |
//! | Recoverable | `MessageParse` | frame discarded, loop continues |
//! | Validation | `ValidationRequestFailed` | token treated as invalid |
//!
//! None of these terminate the process.

use thiserror::Error;

/// Convenient Result alias for Pulsoid operations.
pub type PulsoidResult<T> = std::result::Result<T, PulsoidError>;

/// All errors that can occur in the telemetry pipeline.
#[derive(Error, Debug)]
pub enum PulsoidError {
    // ─── OAuth loopback ─────────────────────────────────────────────
    /// A loopback listener could not bind its port.
    #[error("Failed to bind OAuth listener on port {port}: {reason}")]
    ListenerBind { port: u16, reason: String },

    /// Neither loopback listener received the browser callback in time.
    #[error("OAuth exchange timed out after {seconds}s. Was the browser window closed?")]
    ExchangeTimeout { seconds: u64 },

    /// `authenticate` was called before `start_listeners`.
    #[error("OAuth listeners are not started")]
    ListenersNotStarted,

    // ─── Token ──────────────────────────────────────────────────────
    /// No access token is stored.
    #[error("No Pulsoid connection found. Please connect with the Pulsoid authentication server.")]
    MissingToken,

    /// The remote service rejected the stored token.
    #[error("Invalid access token. Please reconnect with the Pulsoid authentication server.")]
    InvalidToken,

    /// The validation request itself failed (network, DNS, TLS).
    #[error("Token validation request failed: {reason}")]
    ValidationRequestFailed { reason: String },

    // ─── Streaming ──────────────────────────────────────────────────
    /// Failed to open the real-time WebSocket.
    #[error("Failed to connect to heart-rate stream at {url}: {reason}")]
    StreamConnect { url: String, reason: String },

    /// The stream was lost after being established.
    #[error("Heart-rate stream lost: {reason}")]
    ConnectionDropped { reason: String },

    /// An inbound frame did not contain a usable heart rate.
    #[error("Malformed heart-rate message: {reason}")]
    MessageParse { reason: String },

    /// A session start was abandoned because stop was requested.
    #[error("Session start cancelled")]
    Cancelled,

    // ─── Timeout ────────────────────────────────────────────────────
    /// An operation timed out.
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    // ─── Transport ──────────────────────────────────────────────────
    /// Low-level WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// HTTP client error outside of token validation.
    #[error("HTTP error: {0}")]
    Http(String),

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PulsoidError {
    /// Returns `true` if the error means the stream is gone and the session
    /// has to be restarted.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PulsoidError::StreamConnect { .. }
                | PulsoidError::ConnectionDropped { .. }
                | PulsoidError::WebSocket(_)
        )
    }

    /// Returns `true` for failures that require the user to (re)authenticate.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            PulsoidError::MissingToken
                | PulsoidError::InvalidToken
                | PulsoidError::ValidationRequestFailed { .. }
                | PulsoidError::ListenerBind { .. }
                | PulsoidError::ExchangeTimeout { .. }
                | PulsoidError::ListenersNotStarted
        )
    }

    /// Text shown next to the access-error flag.
    ///
    /// Stream failures show the underlying reason only, matching what the
    /// transport reported.
    pub fn user_message(&self) -> String {
        match self {
            PulsoidError::StreamConnect { reason, .. }
            | PulsoidError::ConnectionDropped { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

// ─── From impls for external error types ────────────────────────────────

impl From<tokio_tungstenite::tungstenite::Error> for PulsoidError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PulsoidError::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for PulsoidError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return PulsoidError::ValidationRequestFailed {
                reason: format!("request timed out: {err}"),
            };
        }
        PulsoidError::Http(err.to_string())
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for PulsoidError {
    fn from(err: toml::de::Error) -> Self {
        PulsoidError::ConfigError {
            reason: err.to_string(),
        }
    }
}
