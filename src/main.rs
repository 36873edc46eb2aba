//! CLI entry point.
//!
//! The production deployment embeds the sequencer in a host process that
//! supplies the real transport, GUI and camera; this binary wires the
//! simulated bench instead, for dry-running the protocol and for factory
//! bring-up without hardware:
//!
//! ```bash
//! robot_qc simulate
//! robot_qc --config config/robot_qc.toml simulate --seconds 300
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use robot_qc::prompt::LogConsole;
use robot_qc::sim::SimRobot;
use robot_qc::{Sequencer, Settings};

#[derive(Parser)]
#[command(name = "robot_qc")]
#[command(about = "Factory acceptance-test sequencer for a mobile robot base", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults layered underneath.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Qualify a simulated robot over a simulated bench session
    Simulate {
        /// Session length in (simulated) seconds
        #[arg(long, default_value_t = 360)]
        seconds: u64,

        /// Seed for the stray-event generator
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;
    init_tracing(&settings.application.log_level);

    match cli.command {
        Commands::Simulate { seconds, seed } => simulate(settings, seconds, seed).await,
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn simulate(settings: Settings, seconds: u64, seed: u64) -> Result<()> {
    info!("Starting simulated qualification session ({seconds} s, seed {seed})");
    info!("Results file: {}", settings.output.results_file.display());

    let sim = SimRobot::new(Duration::from_secs(seconds)).with_seed(seed);
    let estimator = sim.matching_estimator();
    let (mut sequencer, link) =
        Sequencer::new(settings, Box::new(LogConsole), Box::new(estimator));

    let bench = tokio::spawn(sim.run(link));
    sequencer.run().await?;
    bench.await?;

    for robot in sequencer.session().evaluated() {
        info!(
            "Robot {} ({}): {}",
            robot.id,
            robot.serial_or_unknown(),
            if robot.all_ok() { "PASS" } else { "FAILED" }
        );
    }
    Ok(())
}
