//! CLI entry point for the detector orchestrator.
//!
//! Loads and validates settings, connects the device client, spawns the
//! periodic pollers and keeps the orchestrator alive until Ctrl+C. The
//! point layer attaches through the library API; in a plain daemon run the
//! readback stream is echoed to the log instead.
//!
//! # Usage
//!
//! ```bash
//! eiger-orch run --host 172.17.1.2 --port 80 --data-dir /data/eiger
//! eiger-orch run --mock    # no hardware, scriptable in-memory detector
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eiger_orch::client::{DeviceClient, MockDetector, SimplonClient};
use eiger_orch::config::Settings;
use eiger_orch::orchestrator::Orchestrator;
use eiger_orch::poller::{spawn_countdown, spawn_file_scanner, spawn_status_poller};

#[derive(Parser)]
#[command(name = "eiger-orch")]
#[command(about = "Control orchestrator for Dectris Eiger area detectors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator daemon
    Run {
        /// Settings file (TOML)
        #[arg(long, default_value = "config/default.toml")]
        config: PathBuf,

        /// Detector IP address, overrides the settings file
        #[arg(long)]
        host: Option<String>,

        /// Detector API port, overrides the settings file
        #[arg(long)]
        port: Option<u16>,

        /// Local dump directory, overrides the settings file
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Use the in-memory mock detector instead of hardware
        #[arg(long)]
        mock: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            host,
            port,
            data_dir,
            mock,
        } => run(config, host, port, data_dir, mock).await,
    }
}

async fn run(
    config: PathBuf,
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
    mock: bool,
) -> Result<()> {
    let mut settings = Settings::load_from(&config)?;
    if let Some(host) = host {
        settings.detector.host = host;
    }
    if let Some(port) = port {
        settings.detector.port = port;
    }
    if let Some(data_dir) = data_dir {
        settings.storage.data_dir = data_dir;
    }
    settings.validate()?;

    env_logger::Builder::new()
        .parse_filters(&settings.application.log_level)
        .init();

    let client: Arc<dyn DeviceClient> = if mock {
        info!("using in-memory mock detector");
        Arc::new(MockDetector::new())
    } else {
        info!(
            "connecting to detector at {}:{}",
            settings.detector.host, settings.detector.port
        );
        Arc::new(SimplonClient::new(
            &settings.detector.host,
            settings.detector.port,
        )?)
    };

    let orchestrator = Arc::new(Orchestrator::new(client, &settings));

    let status_poller = spawn_status_poller(
        Arc::clone(&orchestrator),
        Duration::from_secs_f64(settings.timing.status_poll_s),
    );
    let countdown = spawn_countdown(Arc::clone(&orchestrator));
    let file_scanner = spawn_file_scanner(
        Arc::clone(&orchestrator),
        Duration::from_secs_f64(settings.timing.file_scan_s),
    );

    // Without an attached point layer, echo readbacks to the log.
    let mut readbacks = orchestrator.points().subscribe();
    let echo = tokio::spawn(async move {
        while let Ok(update) = readbacks.recv().await {
            debug!("{} = {:?}", update.name, update.value);
        }
    });

    info!(
        "orchestrator running, dumping files to {}",
        settings.storage.data_dir.display()
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    status_poller.abort();
    countdown.abort();
    file_scanner.abort();
    echo.abort();
    Ok(())
}
