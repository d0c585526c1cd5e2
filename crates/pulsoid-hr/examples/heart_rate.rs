//! Stream the live heart rate and print display outputs as they change.
//!
//! ```bash
//! PULSOID_ACCESS_TOKEN=xxx cargo run --example heart_rate
//! ```

use pulsoid_hr::{PulsoidConfig, SessionController, SharedState, StateField};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = PulsoidConfig::discover(None)?;
    let mut settings = config.monitor.clone();
    settings.enabled = true;
    settings.trend_enabled = true;

    let state = SharedState::new(settings);
    let mut changes = state.subscribe();
    let controller = SessionController::new(&config, state.clone())?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        }
    });

    println!("Streaming heart rate. Press Ctrl+C to stop.");

    let printer = tokio::spawn({
        let state = state.clone();
        async move {
            loop {
                let field = match changes.recv().await {
                    Ok(field) => field,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let out = state.outputs();
                match field {
                    StateField::HeartRate | StateField::TrendIndicator => {
                        println!("{} {} {}", out.heart_icon, out.heart_rate, out.trend_indicator);
                    }
                    StateField::AccessError if out.access_error => {
                        eprintln!("Error: {}", out.access_error_text);
                    }
                    _ => {}
                }
            }
        }
    });

    controller.run(shutdown).await;
    printer.abort();
    Ok(())
}
