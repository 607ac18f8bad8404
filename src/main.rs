//! CLI Entry Point for nearfield-scan
//!
//! Provides command-line access to:
//! - Planning a scan from a configuration file (point count, outlines, time estimate)
//! - Running an acquisition against simulated hardware and saving the grid as CSV
//!
//! # Usage
//!
//! ```bash
//! nearfield-scan plan --config config/scan.toml
//! nearfield-scan plan --config config/scan.toml --json > path.json
//! nearfield-scan run --config config/scan.toml --instrument vna --output data/scan.csv
//! ```
//!
//! Ctrl-C during `run` cancels the acquisition; the partial grid is still written.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use nearfield_scan::config::{AppConfig, DEFAULT_CONFIG_PATH};
use nearfield_scan::data::storage::write_grid_csv;
use nearfield_scan::experiment::planner::{
    plan, DEFAULT_OVERHEAD_SECONDS, DEFAULT_SECONDS_PER_POINT,
};
use nearfield_scan::experiment::{
    format_duration, AcquisitionSequencer, ScanEvent, ScanOutcome, ScanSummary,
};
use nearfield_scan::hardware::mock::{MockSpectrumAnalyzer, MockStage, MockVna};
use nearfield_scan::hardware::Instrument;
use nearfield_scan::logging;

#[derive(Parser)]
#[command(name = "nearfield-scan")]
#[command(about = "Near-field scan planning and acquisition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a scan and print its size and time estimate
    Plan {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print the full path (probe and stage positions) as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run an acquisition against simulated hardware
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Simulated instrument
        #[arg(long, value_enum, default_value_t = InstrumentKind::Analyzer)]
        instrument: InstrumentKind,

        /// Write the final grid to this CSV file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Stage travel time multiplier (0 = instant, 1 = real time)
        #[arg(long, default_value_t = 0.0)]
        time_scale: f64,

        /// Seed for reproducible simulated readings
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InstrumentKind {
    /// Spectrum analyzer, real-valued levels in dBm
    Analyzer,
    /// Vector network analyzer, complex S-parameters
    Vna,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { config, json } => plan_scan(&config, json),
        Commands::Run {
            config,
            instrument,
            output,
            time_scale,
            seed,
        } => run_scan(&config, instrument, output, time_scale, seed).await,
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;
    Ok(config)
}

fn plan_scan(config_path: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let path = plan(&config.scan.geometry()?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&path)?);
        return Ok(());
    }

    let progress = &config.scan.progress;
    let summary = ScanSummary::new(
        path.point_count(),
        progress.seconds_per_point.unwrap_or(DEFAULT_SECONDS_PER_POINT),
        progress.overhead_seconds.unwrap_or(DEFAULT_OVERHEAD_SECONDS),
    );

    println!("Sample points:      {}", path.point_count());
    if let Some(outline) = path.probe_bounding_box() {
        println!("Probe outline:      {:?}", outline);
    }
    if let Some(outline) = path.actuator_bounding_box() {
        println!("Stage outline:      {:?}", outline);
    }
    println!(
        "Estimated duration: {}",
        format_duration(summary.estimated_total)
    );
    Ok(())
}

async fn run_scan(
    config_path: &Path,
    instrument_kind: InstrumentKind,
    output: Option<PathBuf>,
    time_scale: f64,
    seed: Option<u64>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let geometry = config.scan.geometry()?;

    let stage = Arc::new(MockStage::new().with_time_scale(time_scale));
    let instrument: Arc<dyn Instrument> = match instrument_kind {
        InstrumentKind::Analyzer => Arc::new(MockSpectrumAnalyzer::seeded(seed)),
        InstrumentKind::Vna => Arc::new(MockVna::seeded(seed)),
    };

    let sequencer = Arc::new(AcquisitionSequencer::new(stage, instrument));
    let events = sequencer.subscribe();
    let handle = sequencer.start(geometry, &config.scan)?;
    info!(run_id = %handle.run_id(), "Acquisition started, press Ctrl-C to cancel");

    let reporter = tokio::spawn(report_events(events));
    let ctrl_c = {
        let sequencer = Arc::clone(&sequencer);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Cancellation requested");
                sequencer.cancel();
            }
        })
    };

    let outcome = handle.join().await?;
    ctrl_c.abort();
    let _ = reporter.await;

    if let Some(output) = &output {
        write_grid_csv(outcome.grid(), output)?;
        println!("Grid written to {}", output.display());
    }

    match outcome {
        ScanOutcome::Completed { grid, cancelled } => {
            println!(
                "{}: {} of {} cells measured",
                if cancelled { "Cancelled" } else { "Completed" },
                grid.filled_count(),
                grid.len()
            );
            Ok(())
        }
        ScanOutcome::Failed {
            error,
            last_completed_index,
            ..
        } => bail!(
            "Acquisition failed after point {:?}: {}",
            last_completed_index,
            error
        ),
    }
}

async fn report_events(mut events: broadcast::Receiver<ScanEvent>) {
    loop {
        match events.recv().await {
            Ok(ScanEvent::Summary(summary)) => info!(
                point = summary.current_point,
                of = summary.point_count,
                percent = summary.percent(),
                remaining = %format_duration(summary.estimated_remaining()),
                elapsed = %format_duration(summary.elapsed),
                "Progress"
            ),
            Ok(ScanEvent::LastMeasurement(value)) => info!(%value, "Measurement"),
            Ok(event) if event.is_terminal() => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event reporter lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}
