//! cylscan command-line interface.
//!
//! Drives the worker process through the same controller stack the
//! application embeds: probe hardware, exercise single device operations, or
//! run a complete scan with optional record persistence.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cylscan::config::Settings;
use cylscan::hardware::{self, CameraController, TurntableController};
use cylscan::scanner::{ScanEvent, ScanRecordMeta, ScanSession, ScanSettings, Scanner};
use cylscan::storage::{ManifestScanStore, ScanStore};
use cylscan::worker::WorkerSupervisor;

#[derive(Parser)]
#[command(name = "cylscan", version, about = "Cylinder scanner controller")]
struct Cli {
    /// Configuration file (defaults to cylscan.toml next to the binary).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Probe the worker: ping, version, hardware availability.
    Check,
    /// Report device status.
    Status,
    /// Rotate the turntable by a relative angle in degrees.
    Rotate {
        #[arg(allow_hyphen_values = true)]
        degrees: f64,
    },
    /// Capture a single frame to a file.
    Capture {
        #[arg(long, default_value = "capture.png")]
        output: PathBuf,
    },
    /// Run a complete multi-frame scan.
    Scan {
        /// Override the configured frame count.
        #[arg(long)]
        frames: Option<u32>,
        /// Override the configured output directory.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        experiment_id: Option<i64>,
        #[arg(long)]
        phenotyper_id: Option<i64>,
        #[arg(long)]
        plant_barcode: Option<String>,
        #[arg(long)]
        accession_name: Option<String>,
        #[arg(long)]
        plant_age_days: Option<u32>,
        #[arg(long)]
        wave_number: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        CliCommand::Check => check(&settings).await,
        CliCommand::Status => status(&settings).await,
        CliCommand::Rotate { degrees } => rotate(&settings, degrees).await,
        CliCommand::Capture { output } => capture(&settings, output).await,
        CliCommand::Scan {
            frames,
            output,
            experiment_id,
            phenotyper_id,
            plant_barcode,
            accession_name,
            plant_age_days,
            wave_number,
        } => {
            let record = ScanRecordMeta::from_fields(
                experiment_id,
                phenotyper_id,
                plant_barcode,
                accession_name,
                plant_age_days,
                wave_number,
            );
            scan(&settings, frames, output, record).await
        }
    }
}

async fn check(settings: &Settings) -> anyhow::Result<()> {
    let mut supervisor = WorkerSupervisor::new(settings.worker.clone());
    supervisor.start().await.context("starting worker")?;
    let client = supervisor.client()?;

    let pong = hardware::ping(&client).await?;
    let version = hardware::worker_version(&client).await?;
    let status = hardware::check_hardware(&client).await?;

    println!("worker: {pong} (version {version})");
    println!(
        "camera: library={} devices={} available={}",
        status.camera.library_available, status.camera.devices_found, status.camera.available
    );
    println!(
        "daq:    library={} devices={} available={}",
        status.daq.library_available, status.daq.devices_found, status.daq.available
    );

    supervisor.stop().await?;
    Ok(())
}

async fn status(settings: &Settings) -> anyhow::Result<()> {
    let mut supervisor = WorkerSupervisor::new(settings.worker.clone());
    supervisor.start().await.context("starting worker")?;
    let client = supervisor.client()?;

    let camera = CameraController::new(client.clone()).status().await?;
    let turntable = TurntableController::new(client).status().await?;
    println!(
        "camera: connected={} simulated={} available={}",
        camera.connected, camera.is_simulated, camera.available
    );
    println!(
        "turntable: initialized={} position={:.2} simulated={} available={}",
        turntable.initialized, turntable.position, turntable.is_simulated, turntable.available
    );

    supervisor.stop().await?;
    Ok(())
}

async fn rotate(settings: &Settings, degrees: f64) -> anyhow::Result<()> {
    let mut supervisor = WorkerSupervisor::new(settings.worker.clone());
    supervisor.start().await.context("starting worker")?;
    let turntable = TurntableController::new(supervisor.client()?);

    turntable.initialize(&settings.turntable).await?;
    let position = turntable.rotate(degrees).await?;
    println!("position: {position:.2}");
    turntable.cleanup().await?;

    supervisor.stop().await?;
    Ok(())
}

async fn capture(settings: &Settings, output: PathBuf) -> anyhow::Result<()> {
    let mut supervisor = WorkerSupervisor::new(settings.worker.clone());
    supervisor.start().await.context("starting worker")?;
    let camera = CameraController::new(supervisor.client()?);

    camera.connect(&settings.camera).await?;
    let frame = camera.capture(None).await?;
    tokio::fs::write(&output, &frame.data)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "captured {}x{} frame to {}",
        frame.width,
        frame.height,
        output.display()
    );
    camera.disconnect().await?;

    supervisor.stop().await?;
    Ok(())
}

async fn scan(
    settings: &Settings,
    frames: Option<u32>,
    output: Option<PathBuf>,
    record: Option<ScanRecordMeta>,
) -> anyhow::Result<()> {
    let output_dir = output.unwrap_or_else(|| settings.scan.output_dir.clone());
    let store: Arc<dyn ScanStore> = Arc::new(ManifestScanStore::new(&output_dir));

    let mut scanner = Scanner::from_settings(settings, Some(store));
    let mut events = scanner.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ScanEvent::Progress(p) = event {
                info!(
                    "frame {}/{} at {:.2} degrees",
                    p.frame_number + 1,
                    p.total_frames,
                    p.position
                );
            }
        }
    });

    if record.is_none() {
        warn!("no (or incomplete) record metadata supplied; scan will not be persisted");
    }

    let session = ScanSession {
        settings: ScanSettings {
            camera: settings.camera.clone(),
            turntable: settings.turntable.clone(),
            num_frames: frames.unwrap_or(settings.scan.num_frames),
            output_dir,
        },
        record,
    };

    scanner.initialize(session).await.context("initializing scanner")?;
    let outcome = scanner.scan().await;
    scanner.shutdown().await?;
    progress.abort();

    if outcome.success {
        println!(
            "scan complete: {} frames in {}",
            outcome.frames_captured,
            outcome.output_path.display()
        );
        if let Some(id) = outcome.scan_id {
            println!("scan record: {id}");
        }
        Ok(())
    } else {
        let reason = outcome
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".into());
        anyhow::bail!(
            "scan failed after {} frames: {reason}",
            outcome.frames_captured
        )
    }
}
