//! CLI entry point for smu_daq.
//!
//! Provides a command-line interface for:
//! - Running a single synchronized voltage sweep
//! - Recording transfer and output curves over a list of biases
//!
//! Results are printed to stdout as JSON so they can be piped into
//! whatever analysis tooling sits downstream.
//!
//! # Usage
//!
//! ```bash
//! smu_daq --config config/lab.toml sweep --start 0 --stop -60 --step 1
//! smu_daq --config config/lab.toml transfer --start 10 --stop -60 --step 1 \
//!     --biases="-0.1,-1,-5"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smu_daq::config::Settings;
use smu_daq::sweep::{FixedMode, OutputCurve, SweepConfig, TransferCurve};
use smu_daq::{ClassificationTables, SmuChannel, SourceMeter};

#[derive(Parser)]
#[command(name = "smu_daq")]
#[command(about = "Dual-channel SMU sweep runner", long_about = None)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronized voltage sweep on channel A vs. channel B.
    Sweep {
        /// Sweep start voltage.
        #[arg(long)]
        start: f64,
        /// Sweep stop voltage.
        #[arg(long)]
        stop: f64,
        /// Step size.
        #[arg(long, default_value_t = 1.0)]
        step: f64,
        /// Fixed-channel bias; omit for trailing mode.
        #[arg(long)]
        bias: Option<f64>,
        /// Integration time per point, seconds.
        #[arg(long, default_value_t = 0.1)]
        t_int: f64,
        /// Settling delay, seconds (-1 for instrument auto-delay).
        #[arg(long, default_value_t = -1.0)]
        delay: f64,
        /// Pulsed sweep.
        #[arg(long)]
        pulsed: bool,
    },

    /// Record a transfer curve (gate on A, drain on B).
    Transfer {
        /// Gate sweep start voltage.
        #[arg(long)]
        start: f64,
        /// Gate sweep stop voltage.
        #[arg(long)]
        stop: f64,
        /// Gate step magnitude.
        #[arg(long, default_value_t = 1.0)]
        step: f64,
        /// Comma-separated drain biases.
        #[arg(long, value_delimiter = ',')]
        biases: Vec<f64>,
        /// Integration time per point, seconds.
        #[arg(long, default_value_t = 0.1)]
        t_int: f64,
        /// Settling delay, seconds.
        #[arg(long, default_value_t = -1.0)]
        delay: f64,
        /// Pulsed sweeps.
        #[arg(long)]
        pulsed: bool,
    },

    /// Record an output curve (drain on B, gate on A).
    Output {
        /// Drain sweep start voltage.
        #[arg(long)]
        start: f64,
        /// Drain sweep stop voltage.
        #[arg(long)]
        stop: f64,
        /// Drain step magnitude.
        #[arg(long, default_value_t = 1.0)]
        step: f64,
        /// Comma-separated gate biases.
        #[arg(long, value_delimiter = ',')]
        biases: Vec<f64>,
        /// Integration time per point, seconds.
        #[arg(long, default_value_t = 0.1)]
        t_int: f64,
        /// Settling delay, seconds.
        #[arg(long, default_value_t = -1.0)]
        delay: f64,
        /// Pulsed sweeps.
        #[arg(long)]
        pulsed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load settings from '{}'", cli.config))?;

    env_logger::Builder::new()
        .parse_filters(&settings.log_level)
        .init();

    let mut tables = ClassificationTables::defaults();
    if let Some(path) = &settings.tables {
        tables
            .extend_from_toml(path)
            .with_context(|| format!("failed to load table extension '{}'", path))?;
    }

    let transport = settings.connection.build_transport()?;
    let mut meter =
        SourceMeter::with_tables(transport, tables).with_poll(settings.polling.clone());
    meter.connect().await.context("connection failed")?;

    // Interrupt handling: the first Ctrl+C requests a cooperative stop at
    // the next checkpoint; the measurement returns whatever it has.
    let cancel = meter.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; stopping after the current sweep");
            cancel.cancel();
        }
    });

    let result = run(&meter, cli.command).await;
    meter.disconnect().await.ok();
    result
}

async fn run(meter: &SourceMeter, command: Commands) -> Result<()> {
    match command {
        Commands::Sweep {
            start,
            stop,
            step,
            bias,
            t_int,
            delay,
            pulsed,
        } => {
            let traces = meter
                .voltage_sweep(&SweepConfig {
                    sweep_channel: SmuChannel::A,
                    fixed_channel: SmuChannel::B,
                    start,
                    stop,
                    step,
                    fixed: bias.map_or(FixedMode::Trailing, FixedMode::Bias),
                    integration_time: t_int,
                    delay,
                    pulsed,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&traces)?);
        }
        Commands::Transfer {
            start,
            stop,
            step,
            biases,
            t_int,
            delay,
            pulsed,
        } => {
            let set = meter
                .transfer_measurement(&TransferCurve {
                    gate: SmuChannel::A,
                    drain: SmuChannel::B,
                    gate_start: start,
                    gate_stop: stop,
                    gate_step: step,
                    drain_biases: biases,
                    integration_time: t_int,
                    delay,
                    pulsed,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&set)?);
        }
        Commands::Output {
            start,
            stop,
            step,
            biases,
            t_int,
            delay,
            pulsed,
        } => {
            let set = meter
                .output_measurement(&OutputCurve {
                    gate: SmuChannel::A,
                    drain: SmuChannel::B,
                    drain_start: start,
                    drain_stop: stop,
                    drain_step: step,
                    gate_biases: biases,
                    integration_time: t_int,
                    delay,
                    pulsed,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&set)?);
        }
    }
    Ok(())
}
