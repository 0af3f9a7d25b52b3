//! CLI Entry Point for chamber_daq
//!
//! Loads configuration, opens the configured instruments and runs the
//! acquisition loop until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! chamber_daq --config config/chamber_daq.toml
//! CHAMBER_DAQ_ACQUISITION__PERIOD=10s chamber_daq
//! ```
//!
//! Exits 0 after an orderly shutdown; non-zero when the configuration is
//! invalid or no instrument could be opened.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use chamber_daq::config::{DaemonConfig, DEFAULT_CONFIG_PATH};
use chamber_daq::hardware::create_instruments;
use chamber_daq::publish::{InfluxPublisher, NoopPublisher, SamplePublisher};
use chamber_daq::{logging, AcquisitionLoop};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "chamber_daq")]
#[command(about = "Chamber pressure/temperature acquisition daemon", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;

    logging::init_from_config(&config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    tracing::info!(
        app = %config.application.name,
        config = %cli.config.display(),
        channels = config.channels.len(),
        instruments = config.instruments.len(),
        "Starting"
    );

    let instruments = create_instruments(&config.instruments, config.acquisition.read_timeout)?;

    let publisher: Arc<dyn SamplePublisher> = if config.remote.enabled {
        let token = config.remote.token_from_env();
        Arc::new(InfluxPublisher::new(&config.remote, token, &config.channels)?)
    } else {
        tracing::info!("Remote publishing disabled");
        Arc::new(NoopPublisher)
    };

    if !config.storage.enabled {
        tracing::info!("Local storage disabled");
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let summary = AcquisitionLoop::new(&config, instruments, publisher)
        .run(cancel)
        .await;

    tracing::info!(
        ticks = summary.ticks,
        windows = summary.finalized.len(),
        "Daemon shut down"
    );
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
