// lutra: long-running foreground daemon bridging one Caséta hub to one
// MQTT broker. Exit codes: 0 graceful shutdown, 1 configuration or
// startup failure, 2 fatal hub authentication failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lutra_core::{Bridge, BridgeError};

/// Bridge Lutron Caséta devices to an MQTT broker.
///
/// State is published retained to `<prefix>/<area>/<device>/<channel>/state`,
/// commands are accepted on `<prefix>/<area>/<device>/<channel>/set`
/// (payload `ON`, `OFF`, or 0-100), Pico button events appear on
/// `<prefix>/<area>/<device>/button/<n>/event`, and bridge availability
/// on `<prefix>/bridge/status`.
#[derive(Debug, Parser)]
#[command(name = "lutra", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(
        short,
        long,
        env = "LUTRA_CONFIG_FILE",
        default_value = lutra_config::DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match lutra_config::load(Some(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration failed");
            return ExitCode::from(1);
        }
    };

    let bridge = Bridge::new(config);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    match bridge.run(cancel).await {
        Ok(()) => {
            tracing::info!("bridge stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "bridge failed");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn exit_code(err: &BridgeError) -> u8 {
    if err.is_fatal() { 2 } else { 1 }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
