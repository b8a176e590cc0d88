//! switchyard server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ Service::accept
//!                                     │
//!               ┌─────────────────────┼──────────────────────┐
//!               ▼                     ▼                      ▼
//!         http::acceptor        http::acceptor          management
//!         (web_server)          (reverse_proxy)         line pump
//!               │                     │
//!               ▼                     ▼
//!         request queue ──▶ dispatch ──▶ files::serve
//!                                   └──▶ Pool::get_backend ──▶ Backend
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use switchyard::config::{apply_config, load_config};
use switchyard::control::Registry;
use switchyard::lifecycle::wait_for_signal;
use switchyard::observability::logging::{init_logging, LogFormat};
use switchyard::observability::metrics::init_metrics;

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Multi-role network service host")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "switchyard.toml")]
    config: PathBuf,

    /// Override the configured log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if args.check {
        println!("{}: ok", args.config.display());
        return ExitCode::SUCCESS;
    }

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let logging = config
        .observability
        .log_format
        .parse::<LogFormat>()
        .and_then(|format| init_logging(level, format));
    if let Err(e) = logging {
        eprintln!("logging: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "switchyard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Metrics exporter not started");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Registry::new(config.runtime.clone());
    if let Err(e) = apply_config(&registry, &config) {
        tracing::error!(error = %e, "Configuration not applied");
        registry.shutdown();
        return ExitCode::FAILURE;
    }

    match wait_for_signal().await {
        Ok(signal) => tracing::info!(signal, "Shutdown requested"),
        Err(e) => tracing::error!(error = %e, "Signal handler failed, shutting down"),
    }
    registry.shutdown();

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
