//! # pulsoid-hr
//!
//! Heart-rate telemetry from [Pulsoid](https://pulsoid.net): the OAuth
//! loopback exchange, the real-time WebSocket feed, and the signal processing
//! that turns raw beats-per-minute into display values.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pulsoid_hr::{PulsoidConfig, SessionController, SharedState};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pulsoid_hr::PulsoidResult<()> {
//!     // Load config from environment or pulsoid.toml
//!     let config = PulsoidConfig::discover(None)?;
//!
//!     // Settings go in, display values come out
//!     let state = SharedState::new(config.monitor.clone());
//!     let controller = SessionController::new(&config, state.clone())?;
//!
//!     state.update_settings(|s| {
//!         s.enabled = true;
//!         s.trend_enabled = true;
//!     });
//!
//!     controller.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! | Component | Type | Role |
//! |-----------|------|------|
//! | Token broker | [`TokenBroker`] | Loopback OAuth exchange, token validation |
//! | Streaming client | [`StreamingClient`] | Authenticated WebSocket, receive loop |
//! | Signal processor | [`SignalProcessor`] + [`ProcessorTimer`] | Smoothing, trend, icons on a fixed cadence |
//! | Session controller | [`SessionController`] | Start/stop lifecycle driven by [`SharedState`] changes |
//!
//! The receive loop and the processor share exactly one value, the latest
//! sample in a [`RawSampleSlot`]. Everything user-facing goes through
//! [`SharedState`].
//!
//! ## Configuration
//!
//! See [`PulsoidConfig`] for the full reference. The simplest setup uses
//! environment variables:
//!
//! ```bash
//! export PULSOID_CLIENT_ID="your-client-id"
//! export PULSOID_ACCESS_TOKEN="your-access-token"
//! ```
//!
//! Or a `pulsoid.toml` file:
//!
//! ```toml
//! client_id = "your-client-id"
//!
//! [monitor]
//! access_token = "your-access-token"
//! trend_enabled = true
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod processing;
pub mod protocol;
pub mod sample;
pub mod session;
pub mod state;
pub mod stream;
pub mod timer;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use auth::{BrowserLauncher, SystemBrowser, TokenBroker};
pub use config::PulsoidConfig;
pub use error::{PulsoidError, PulsoidResult};
pub use processing::{SignalProcessor, TickOutcome, TrendSymbolSet};
pub use protocol::OAuthFragment;
pub use sample::{RawSample, RawSampleSlot};
pub use session::{SessionController, SessionState};
pub use state::{DisplayOutputs, MonitorSettings, SharedState, StateField};
pub use stream::{StreamEnd, StreamExit, StreamingClient};
pub use timer::ProcessorTimer;
