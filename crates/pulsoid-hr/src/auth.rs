//! # OAuth Loopback Exchange and Token Validation
//!
//! Pulsoid's implicit grant delivers the access token in the URL fragment of
//! the redirect, which a server never sees. [`TokenBroker`] captures it with
//! two loopback listeners:
//!
//! ```text
//!  browser ──GET /──────────────► redirect listener (7384)
//!          ◄── HTML + script ────
//!  script  ──POST fragment──────► relay listener (7385) ──► authenticate()
//!  browser ──► landing page
//! ```
//!
//! The relayed body (`access_token=...&token_type=...`) is returned verbatim;
//! use [`OAuthFragment::parse`](crate::protocol::OAuthFragment::parse) to pick
//! it apart. The whole round trip is bounded by
//! [`OAuthConfig::exchange_timeout_secs`](crate::config::OAuthConfig).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PulsoidConfig;
use crate::error::{PulsoidError, PulsoidResult};

/// How long `stop_listeners` waits for each server to shut down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffer for captured callbacks. Only the first of each is consumed.
const CALLBACK_BUFFER: usize = 8;

// ─── Browser ────────────────────────────────────────────────────────────

/// Opens the authorization URL for the user.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> PulsoidResult<()>;
}

/// Platform default URL handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> PulsoidResult<()> {
        open::that_detached(url)?;
        tracing::info!("Opened authorization page in browser");
        Ok(())
    }
}

// ─── Listeners ──────────────────────────────────────────────────────────

struct Listeners {
    redirect_addr: SocketAddr,
    relay_addr: SocketAddr,
    redirect_rx: mpsc::Receiver<()>,
    relay_rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
struct RedirectState {
    page: Arc<str>,
    hits: mpsc::Sender<()>,
}

#[derive(Clone)]
struct RelayState {
    bodies: mpsc::Sender<String>,
}

async fn redirect_page(State(state): State<RedirectState>) -> Html<String> {
    tracing::debug!("OAuth redirect received");
    let _ = state.hits.try_send(());
    Html(state.page.to_string())
}

async fn relay_fragment(State(state): State<RelayState>, body: String) -> impl IntoResponse {
    tracing::debug!(len = body.len(), "OAuth fragment relayed");
    let _ = state.bodies.try_send(body);
    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], "OK")
}

/// HTML served on the redirect listener. Posts the fragment to the relay
/// port, then moves the browser on to `landing_url`.
pub fn redirect_html(relay_port: u16, landing_url: &str) -> String {
    // JSON string literal, with `</` split so it cannot end the script block.
    let landing = serde_json::Value::from(landing_url)
        .to_string()
        .replace("</", "<\\/");
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Pulsoid</title></head>
<body>
<p>Completing Pulsoid sign-in...</p>
<script>
fetch('http://localhost:{relay_port}/', {{
    method: 'POST',
    mode: 'no-cors',
    headers: {{ 'Content-Type': 'text/plain' }},
    body: window.location.hash.substring(1)
}}).finally(function () {{
    location.replace({landing});
}});
</script>
</body>
</html>
"#
    )
}

async fn bind(port: u16) -> PulsoidResult<TcpListener> {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .map_err(|e| PulsoidError::ListenerBind {
            port,
            reason: e.to_string(),
        })
}

fn spawn_server(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    name: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(listener = name, error = %e, "OAuth listener failed");
        }
        tracing::debug!(listener = name, "OAuth listener stopped");
    })
}

// ─── Broker ─────────────────────────────────────────────────────────────

/// Obtains tokens through the loopback exchange and validates them.
pub struct TokenBroker {
    redirect_port: u16,
    relay_port: u16,
    landing_url: String,
    exchange_timeout: Duration,
    validate_url: String,
    http: reqwest::Client,
    browser: Arc<dyn BrowserLauncher>,
    listeners: Option<Listeners>,
}

impl TokenBroker {
    /// Create a broker that opens URLs with the [`SystemBrowser`].
    pub fn new(config: &PulsoidConfig) -> PulsoidResult<Self> {
        Self::with_browser(config, Arc::new(SystemBrowser))
    }

    /// Create a broker with a custom [`BrowserLauncher`].
    pub fn with_browser(
        config: &PulsoidConfig,
        browser: Arc<dyn BrowserLauncher>,
    ) -> PulsoidResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.validate_timeout_secs))
            .build()?;

        Ok(Self {
            redirect_port: config.oauth.redirect_port,
            relay_port: config.oauth.relay_port,
            landing_url: config.endpoints.landing_url.clone(),
            exchange_timeout: Duration::from_secs(config.oauth.exchange_timeout_secs),
            validate_url: config.endpoints.validate_url.clone(),
            http,
            browser,
            listeners: None,
        })
    }

    /// Bind both loopback listeners. Does nothing if they are already up.
    pub async fn start_listeners(&mut self) -> PulsoidResult<()> {
        if self.listeners.is_some() {
            return Ok(());
        }

        let redirect = bind(self.redirect_port).await?;
        let relay = bind(self.relay_port).await?;
        let redirect_addr = redirect.local_addr()?;
        let relay_addr = relay.local_addr()?;

        let (hits, redirect_rx) = mpsc::channel(CALLBACK_BUFFER);
        let (bodies, relay_rx) = mpsc::channel(CALLBACK_BUFFER);

        let redirect_app = Router::new()
            .route("/", get(redirect_page))
            .with_state(RedirectState {
                page: redirect_html(relay_addr.port(), &self.landing_url).into(),
                hits,
            });
        let relay_app = Router::new()
            .route("/", post(relay_fragment))
            .with_state(RelayState { bodies });

        let shutdown = CancellationToken::new();
        let tasks = vec![
            spawn_server(redirect, redirect_app, shutdown.clone(), "redirect"),
            spawn_server(relay, relay_app, shutdown.clone(), "relay"),
        ];

        tracing::info!(%redirect_addr, %relay_addr, "OAuth listeners started");

        self.listeners = Some(Listeners {
            redirect_addr,
            relay_addr,
            redirect_rx,
            relay_rx,
            shutdown,
            tasks,
        });
        Ok(())
    }

    /// Shut both listeners down and release their ports.
    ///
    /// Safe to call when the listeners were never started.
    pub async fn stop_listeners(&mut self) {
        let Some(listeners) = self.listeners.take() else {
            return;
        };

        listeners.shutdown.cancel();
        for task in listeners.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }
        tracing::info!("OAuth listeners stopped");
    }

    pub fn is_listening(&self) -> bool {
        self.listeners.is_some()
    }

    /// Bound address of the redirect listener.
    pub fn redirect_addr(&self) -> Option<SocketAddr> {
        self.listeners.as_ref().map(|l| l.redirect_addr)
    }

    /// Bound address of the relay listener.
    pub fn relay_addr(&self) -> Option<SocketAddr> {
        self.listeners.as_ref().map(|l| l.relay_addr)
    }

    /// Open `authorization_url` in the browser and wait for the redirect
    /// and the relayed fragment. Returns the relayed body verbatim.
    ///
    /// # Errors
    ///
    /// - [`PulsoidError::ListenersNotStarted`] before [`start_listeners`](Self::start_listeners)
    /// - [`PulsoidError::ExchangeTimeout`] if the round trip does not finish in time
    pub async fn authenticate(&mut self, authorization_url: &str) -> PulsoidResult<String> {
        let listeners = self
            .listeners
            .as_mut()
            .ok_or(PulsoidError::ListenersNotStarted)?;

        // Leftovers from an abandoned attempt.
        while listeners.redirect_rx.try_recv().is_ok() {}
        while listeners.relay_rx.try_recv().is_ok() {}

        self.browser.open(authorization_url)?;

        let exchange = async {
            listeners
                .redirect_rx
                .recv()
                .await
                .ok_or(PulsoidError::ListenersNotStarted)?;
            listeners
                .relay_rx
                .recv()
                .await
                .ok_or(PulsoidError::ListenersNotStarted)
        };

        let body = tokio::time::timeout(self.exchange_timeout, exchange)
            .await
            .map_err(|_| PulsoidError::ExchangeTimeout {
                seconds: self.exchange_timeout.as_secs(),
            })??;

        tracing::info!("OAuth exchange completed");
        Ok(body)
    }

    /// Check `token` against the validation endpoint.
    ///
    /// `Ok(true)` only for a success status. A request that never got a
    /// response is returned as [`PulsoidError::ValidationRequestFailed`];
    /// callers treat it as invalid.
    pub async fn validate(&self, token: &str) -> PulsoidResult<bool> {
        let response = self
            .http
            .get(&self.validate_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PulsoidError::ValidationRequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(%status, "Access token is valid");
        } else {
            tracing::warn!(%status, "Access token rejected");
        }
        Ok(status.is_success())
    }
}

impl Drop for TokenBroker {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.take() {
            listeners.shutdown.cancel();
            for task in listeners.tasks {
                task.abort();
            }
        }
    }
}
