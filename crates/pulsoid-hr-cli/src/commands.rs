use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use pulsoid_hr::{
    BrowserLauncher, OAuthFragment, PulsoidConfig, PulsoidError, PulsoidResult, SessionController,
    SharedState, StateField, SystemBrowser, TokenBroker,
};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ─── Auth ───────────────────────────────────────────────────────────────

/// Prints the URL for the user to open by hand.
struct PrintUrl;

impl BrowserLauncher for PrintUrl {
    fn open(&self, url: &str) -> PulsoidResult<()> {
        println!("Open this URL in your browser:\n\n  {url}\n");
        Ok(())
    }
}

fn state_nonce() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    format!("{:x}{:x}", nanos, std::process::id())
}

pub async fn cmd_auth(config: &PulsoidConfig, no_browser: bool) -> CmdResult {
    let browser: Arc<dyn BrowserLauncher> = if no_browser {
        Arc::new(PrintUrl)
    } else {
        Arc::new(SystemBrowser)
    };
    let mut broker = TokenBroker::with_browser(config, browser)?;

    let nonce = state_nonce();
    let url = config.authorize_url(&nonce)?;

    broker.start_listeners().await?;
    println!("Waiting for the browser sign-in (Ctrl-C to abort)...");

    let outcome = tokio::select! {
        result = broker.authenticate(&url) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    broker.stop_listeners().await;

    let Some(body) = outcome.transpose()? else {
        eprintln!("Aborted.");
        return Ok(());
    };

    let fragment = OAuthFragment::parse(&body);
    if fragment.state.as_deref() != Some(nonce.as_str()) {
        tracing::warn!(expected = %nonce, got = ?fragment.state, "OAuth state mismatch");
        return Err("OAuth state did not match the request; discarding the response".into());
    }

    let token = fragment.into_token()?;
    println!("Access token:\n{token}");
    println!("\nStore it as PULSOID_ACCESS_TOKEN or under [monitor] access_token in pulsoid.toml.");
    Ok(())
}

// ─── Validate ───────────────────────────────────────────────────────────

pub async fn cmd_validate(config: &PulsoidConfig, token: Option<String>) -> CmdResult {
    let token = token
        .or_else(|| config.monitor.token().map(str::to_string))
        .ok_or(PulsoidError::MissingToken)?;

    let broker = TokenBroker::new(config)?;
    if broker.validate(&token).await? {
        println!("Token is valid.");
        Ok(())
    } else {
        eprintln!("Token was rejected.");
        Err(PulsoidError::InvalidToken.into())
    }
}

// ─── Monitor ────────────────────────────────────────────────────────────

pub struct MonitorOptions {
    pub token: Option<String>,
    pub vr: bool,
    pub smooth: bool,
    pub trend: bool,
}

pub async fn cmd_monitor(config: &PulsoidConfig, opts: MonitorOptions) -> CmdResult {
    let mut settings = config.monitor.clone();
    settings.enabled = true;
    settings.in_vr = opts.vr;
    settings.smoothing_enabled |= opts.smooth;
    settings.trend_enabled |= opts.trend;
    if opts.token.is_some() {
        settings.access_token = opts.token;
    }

    let state = SharedState::new(settings);
    let mut changes = state.subscribe();
    let controller = Arc::new(SessionController::new(config, state.clone())?);

    let shutdown = CancellationToken::new();
    let runner = tokio::spawn({
        let controller = Arc::clone(&controller);
        let shutdown = shutdown.clone();
        async move { controller.run(shutdown).await }
    });

    println!("Monitoring heart rate (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(field) => print_change(&state, field),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Display updates lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    shutdown.cancel();
    runner.await?;
    println!("Stopped.");
    Ok(())
}

fn print_change(state: &SharedState, field: StateField) {
    let out = state.outputs();
    match field {
        StateField::HeartRate | StateField::TrendIndicator | StateField::HeartIcon => {
            if out.device_online {
                println!("{} {} {}", out.heart_icon, out.heart_rate, out.trend_indicator);
            }
        }
        StateField::DeviceOnline => {
            println!("Device {}", if out.device_online { "online" } else { "offline" });
        }
        StateField::AccessError if out.access_error => {
            eprintln!("Error: {}", out.access_error_text);
        }
        _ => {}
    }
}
