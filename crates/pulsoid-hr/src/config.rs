//! # Configuration
//!
//! [`PulsoidConfig`] holds the endpoints, OAuth loopback settings, timeouts and
//! the initial [`MonitorSettings`] for a monitoring session.
//!
//! ## Loading Priority
//!
//! Configuration is loaded from the first source that provides a value:
//!
//! 1. Explicit struct fields (programmatic construction)
//! 2. TOML config file at an explicit path
//! 3. `PULSOID_CONFIG` environment variable
//! 4. `./pulsoid.toml` in the current directory
//! 5. `~/.config/pulsoid-hr/pulsoid.toml`
//! 6. Environment variables only
//!
//! Individual fields can always be overridden by environment variables,
//! even when loading from a file:
//! `PULSOID_CLIENT_ID`, `PULSOID_ACCESS_TOKEN`, `PULSOID_STREAM_URL`,
//! `PULSOID_VALIDATE_URL`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PulsoidError, PulsoidResult};
use crate::state::MonitorSettings;

/// Real-time heart-rate WebSocket endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://dev.pulsoid.net/api/v1/data/real_time";

/// Token validation endpoint.
pub const DEFAULT_VALIDATE_URL: &str = "https://dev.pulsoid.net/api/v1/token/validate";

/// OAuth2 authorization endpoint (implicit grant).
pub const DEFAULT_AUTHORIZE_URL: &str = "https://pulsoid.net/oauth2/authorize";

/// Page the browser lands on once the fragment has been relayed.
pub const DEFAULT_LANDING_URL: &str = "https://pulsoid.net/ui/integrations";

/// Port receiving the OAuth redirect.
pub const DEFAULT_REDIRECT_PORT: u16 = 7384;

/// Port receiving the fragment relayed by the redirect page.
pub const DEFAULT_RELAY_PORT: u16 = 7385;

/// Scope needed to read the real-time heart rate.
pub const DEFAULT_SCOPE: &str = "data:heart_rate:read";

/// Default bound on the whole browser round trip, in seconds.
const DEFAULT_EXCHANGE_TIMEOUT_SECS: u64 = 300;

/// Default WebSocket handshake timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default token validation request timeout in seconds.
const DEFAULT_VALIDATE_TIMEOUT_SECS: u64 = 10;

/// Default time to wait for the receive loop to unwind on stop, in seconds.
const DEFAULT_DISCONNECT_TIMEOUT_SECS: u64 = 2;

/// Configuration for the Pulsoid heart-rate pipeline.
///
/// # Examples
///
/// ```
/// use pulsoid_hr::config::PulsoidConfig;
///
/// let config = PulsoidConfig::new("my-client-id");
/// assert_eq!(config.oauth.redirect_port, 7384);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsoidConfig {
    /// OAuth client ID registered with Pulsoid.
    #[serde(default)]
    pub client_id: String,

    /// Remote endpoints.
    #[serde(default)]
    pub endpoints: EndpointConfig,

    /// Loopback OAuth exchange settings.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Initial monitor settings handed to the shared state.
    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Remote service URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Real-time WebSocket URL.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,

    /// Token validation URL.
    #[serde(default = "default_validate_url")]
    pub validate_url: String,

    /// OAuth2 authorization URL.
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,

    /// Where the browser is sent after relaying the token.
    #[serde(default = "default_landing_url")]
    pub landing_url: String,
}

/// Loopback listener settings for the OAuth exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Port of the redirect listener. Must match the registered redirect URI.
    #[serde(default = "default_redirect_port")]
    pub redirect_port: u16,

    /// Port of the relay listener receiving the POSTed fragment.
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,

    /// Requested OAuth scope.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Maximum time to wait for the browser round trip, in seconds.
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
}

/// Timeout settings for network operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// WebSocket handshake timeout, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Token validation request timeout, in seconds.
    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,

    /// Time allowed for the receive loop to unwind on disconnect, in seconds.
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,
}

// ─── Defaults ───────────────────────────────────────────────────────────

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_validate_url() -> String {
    DEFAULT_VALIDATE_URL.to_string()
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_landing_url() -> String {
    DEFAULT_LANDING_URL.to_string()
}

fn default_redirect_port() -> u16 {
    DEFAULT_REDIRECT_PORT
}

fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_exchange_timeout() -> u64 {
    DEFAULT_EXCHANGE_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_validate_timeout() -> u64 {
    DEFAULT_VALIDATE_TIMEOUT_SECS
}

fn default_disconnect_timeout() -> u64 {
    DEFAULT_DISCONNECT_TIMEOUT_SECS
}

// ─── Default impls ──────────────────────────────────────────────────────

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            stream_url: default_stream_url(),
            validate_url: default_validate_url(),
            authorize_url: default_authorize_url(),
            landing_url: default_landing_url(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            redirect_port: DEFAULT_REDIRECT_PORT,
            relay_port: DEFAULT_RELAY_PORT,
            scope: default_scope(),
            exchange_timeout_secs: DEFAULT_EXCHANGE_TIMEOUT_SECS,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            validate_timeout_secs: DEFAULT_VALIDATE_TIMEOUT_SECS,
            disconnect_timeout_secs: DEFAULT_DISCONNECT_TIMEOUT_SECS,
        }
    }
}

impl Default for PulsoidConfig {
    fn default() -> Self {
        Self::new("")
    }
}

// ─── PulsoidConfig impl ────────────────────────────────────────────────

impl PulsoidConfig {
    /// Create a config with just an OAuth client ID (all other fields use defaults).
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            endpoints: EndpointConfig::default(),
            oauth: OAuthConfig::default(),
            timeouts: TimeoutConfig::default(),
            monitor: MonitorSettings::default(),
        }
    }

    /// Load config from environment variables only.
    ///
    /// Every variable is optional; missing ones keep their defaults.
    ///
    /// # Errors
    /// Currently infallible; the `Result` keeps the signature aligned with
    /// the file loaders.
    pub fn from_env() -> PulsoidResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a TOML file, with environment variable overrides.
    ///
    /// # Errors
    /// Returns [`PulsoidError::ConfigError`] if the file cannot be read or parsed.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> PulsoidResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| PulsoidError::ConfigError {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Discover and load config from the standard search path:
    ///
    /// 1. Explicit path (if `Some`)
    /// 2. `PULSOID_CONFIG` environment variable
    /// 3. `./pulsoid.toml`
    /// 4. `~/.config/pulsoid-hr/pulsoid.toml`
    ///
    /// Falls back to environment-variable-only config if no file is found.
    ///
    /// # Errors
    /// Returns [`PulsoidError::ConfigError`] if a discovered file is invalid,
    /// or if an explicit path is given but TOML support is disabled.
    pub fn discover(explicit_path: Option<&Path>) -> PulsoidResult<Self> {
        #[cfg(feature = "config-toml")]
        {
            if let Some(path) = explicit_path {
                return Self::from_file(path);
            }

            if let Ok(path) = std::env::var("PULSOID_CONFIG") {
                let path = PathBuf::from(path);
                if path.exists() {
                    return Self::from_file(&path);
                }
            }

            let local_path = PathBuf::from("pulsoid.toml");
            if local_path.exists() {
                return Self::from_file(&local_path);
            }

            if let Some(config_path) = dirs_config_path() {
                if config_path.exists() {
                    return Self::from_file(&config_path);
                }
            }
        }

        #[cfg(not(feature = "config-toml"))]
        if let Some(path) = explicit_path {
            return Err(PulsoidError::ConfigError {
                reason: format!(
                    "Cannot load '{}': built without the `config-toml` feature",
                    path.display()
                ),
            });
        }

        Self::from_env()
    }

    /// Build the implicit-grant authorization URL the browser is sent to.
    ///
    /// `state` is echoed back in the fragment and can be checked by the caller.
    ///
    /// # Errors
    /// Returns [`PulsoidError::ConfigError`] if no client ID is configured or
    /// the authorize URL is malformed.
    pub fn authorize_url(&self, state: &str) -> PulsoidResult<String> {
        if self.client_id.trim().is_empty() {
            return Err(PulsoidError::ConfigError {
                reason: "client_id is required to build the authorization URL (set PULSOID_CLIENT_ID)"
                    .into(),
            });
        }

        let redirect_uri = format!("http://localhost:{}/", self.oauth.redirect_port);
        let url = reqwest::Url::parse_with_params(
            &self.endpoints.authorize_url,
            &[
                ("response_type", "token"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", self.oauth.scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| PulsoidError::ConfigError {
            reason: format!(
                "Invalid authorize URL '{}': {}",
                self.endpoints.authorize_url, e
            ),
        })?;

        Ok(url.into())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("PULSOID_CLIENT_ID") {
            self.client_id = id;
        }
        if let Ok(token) = std::env::var("PULSOID_ACCESS_TOKEN") {
            self.monitor.access_token = Some(token);
        }
        if let Ok(url) = std::env::var("PULSOID_STREAM_URL") {
            self.endpoints.stream_url = url;
        }
        if let Ok(url) = std::env::var("PULSOID_VALIDATE_URL") {
            self.endpoints.validate_url = url;
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

/// Platform-appropriate config file path.
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|dir| PathBuf::from(dir).join("pulsoid-hr").join("pulsoid.toml"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("pulsoid-hr")
                .join("pulsoid.toml")
        })
    }
}
