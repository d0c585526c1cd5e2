//! # pulsoid-hr
//!
//! Command-line front end for the `pulsoid-hr` library: runs the loopback
//! OAuth exchange, checks tokens, and monitors the live heart rate with the
//! same smoothing/trend/icon pipeline an overlay would use.

use std::path::Path;

use clap::{Parser, Subcommand};

mod commands;

use pulsoid_hr::PulsoidConfig;

/// Pulsoid heart-rate monitor.
#[derive(Parser)]
#[command(name = "pulsoid-hr", version, about)]
struct Cli {
    /// Path to pulsoid.toml config file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose logging (set RUST_LOG for fine-grained control)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in through the browser and print the access token
    Auth {
        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Check an access token against the validation endpoint
    Validate {
        /// Token to check (defaults to the configured token)
        #[arg(long)]
        token: Option<String>,
    },

    /// Stream the heart rate until Ctrl-C
    Monitor {
        /// Token to use (defaults to the configured token)
        #[arg(long)]
        token: Option<String>,

        /// Treat the session as running in VR
        #[arg(long)]
        vr: bool,

        /// Enable moving-average smoothing
        #[arg(long)]
        smooth: bool,

        /// Enable trend arrows
        #[arg(long)]
        trend: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pulsoid_hr=debug,pulsoid_hr_cli=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("pulsoid_hr=warn")
            .init();
    }

    let config = match PulsoidConfig::discover(cli.config.as_deref().map(Path::new)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Note: {e}. Using defaults.");
            eprintln!(
                "  Set PULSOID_CLIENT_ID and PULSOID_ACCESS_TOKEN, or create a pulsoid.toml file.\n"
            );
            PulsoidConfig::from_env()?
        }
    };

    match cli.command {
        Command::Auth { no_browser } => commands::cmd_auth(&config, no_browser).await?,
        Command::Validate { token } => commands::cmd_validate(&config, token).await?,
        Command::Monitor {
            token,
            vr,
            smooth,
            trend,
        } => {
            commands::cmd_monitor(
                &config,
                commands::MonitorOptions {
                    token,
                    vr,
                    smooth,
                    trend,
                },
            )
            .await?;
        }
    }

    Ok(())
}
