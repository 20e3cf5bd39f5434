//! # LinMot Curve Transfer Binary
//!
//! Runs a curve controller and the cycle clock against the simulated
//! configuration module and performs one curve operation.
//!
//! # Usage
//!
//! ```bash
//! # Write a curve, keeping device memory between runs
//! lm_transfer --store /tmp/lm_curves.json write --curve-id 3 --name ramp --dt 0.01 0 1 2 3
//!
//! # Read it back as JSON
//! lm_transfer --store /tmp/lm_curves.json read --curve-id 3
//!
//! # Write a generated curve and read it back
//! lm_transfer --config config/lm_transfer.toml demo -v
//!
//! # Print the effective configuration
//! lm_transfer --config config/lm_transfer.toml config
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand};
use lm_common::config::{ConfigLoader, LmConfig, LogLevel};
use lm_common::curve::PositionTimeCurve;
use lm_common::status::{AxisScaling, BuildResult, MemoryStatusSink};
use lm_transfer::cycle::CycleHook;
use lm_transfer::drivers::simulation::SimulatedConfigModule;
use lm_transfer::{CurveController, CycleBus, CycleClock};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

/// LinMot curve transfer over the configuration module
#[derive(Parser, Debug)]
#[command(name = "lm_transfer")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Write and read LinMot position-time curves")]
#[command(long_about = None)]
struct Args {
    /// Path to configuration file (lm_transfer.toml). Defaults apply if omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON file holding the simulated device's curve memory
    #[arg(long, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Axis whose read-back array is published
    #[arg(long, default_value_t = 0)]
    axis: usize,

    /// Seconds to wait for a transfer before giving up
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a curve to the device
    Write {
        #[arg(long)]
        curve_id: u16,
        #[arg(long)]
        name: String,
        /// Sample spacing in seconds
        #[arg(long)]
        dt: f64,
        /// Setpoints in engineering units
        #[arg(required = true, allow_hyphen_values = true)]
        points: Vec<f64>,
    },
    /// Read a curve from the device and print it as JSON
    Read {
        #[arg(long)]
        curve_id: u16,
    },
    /// Delete a curve on the device
    Delete {
        #[arg(long)]
        curve_id: u16,
    },
    /// Write a generated S-curve and read it back
    Demo {
        #[arg(long, default_value_t = 1)]
        curve_id: u16,
        #[arg(long, default_value_t = 200)]
        points: usize,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Serialize)]
struct ReadOutput<'a> {
    curve: &'a PositionTimeCurve,
    readbacks: &'a [f64],
}

fn main() {
    if let Err(e) = run() {
        error!("lm_transfer failed: {}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), BoxError> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => LmConfig::load(path)?,
        None => LmConfig::default(),
    };
    config.validate()?;

    setup_tracing(&args, config.shared.log_level);
    info!("LinMot curve transfer v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Command::Config = args.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let sim = SimulatedConfigModule::new();
    if let Some(path) = &args.store {
        load_store(&sim, path)?;
    }

    let bus = Arc::new(CycleBus::new());
    let sink = Arc::new(MemoryStatusSink::new());
    // Identity read-back projection on the CLI axis.
    sink.set_axis_scaling(args.axis, AxisScaling::default());
    let channel = Arc::new(Mutex::new(sim.channel()));
    let mut controller = CurveController::spawn(
        &config.shared.service_name,
        args.axis,
        Arc::clone(&channel),
        sink.clone(),
        &bus,
        &config,
    )?;

    let exchange = sim.clone();
    let hook = move || {
        let _device = channel.lock();
        exchange.exchange();
    };
    let mut clock = CycleClock::start(
        Arc::clone(&bus),
        config.bus.cycle_time(),
        Some(Box::new(hook) as CycleHook),
    )?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let clock_running = clock.running_flag();
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            interrupted.store(true, Ordering::SeqCst);
            clock_running.store(false, Ordering::SeqCst);
        })?;
    }

    let session = Session {
        controller: &controller,
        sink: &sink,
        interrupted: &interrupted,
        wait: Duration::from_secs(args.wait_secs),
    };
    let result = session.execute(args.command, config.bus.cycle_time());

    if let Some(stats) = clock.stop() {
        info!(
            "Clock: {} cycles, {} overruns, max {}us",
            stats.cycle_count,
            stats.overruns,
            stats.max_cycle_ns / 1000
        );
    }
    controller.shutdown();

    if let Some(path) = &args.store {
        save_store(&sim, path)?;
    }

    info!("LinMot curve transfer shutdown complete");
    result
}

struct Session<'a> {
    controller: &'a CurveController,
    sink: &'a MemoryStatusSink,
    interrupted: &'a AtomicBool,
    wait: Duration,
}

impl Session<'_> {
    fn execute(&self, command: Command, cycle_time: Duration) -> Result<(), BoxError> {
        match command {
            Command::Write {
                curve_id,
                name,
                dt,
                points,
            } => {
                let curve = PositionTimeCurve::with_setpoints(&name, curve_id, dt, points)?;
                self.write(curve)
            }
            Command::Read { curve_id } => {
                let curve = self.read(curve_id)?;
                let snapshot = self.sink.snapshot();
                let readbacks = snapshot
                    .readbacks
                    .get(&self.controller.axis())
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let output = ReadOutput {
                    curve: &curve,
                    readbacks,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
                Ok(())
            }
            Command::Delete { curve_id } => {
                self.controller.delete_curve(curve_id)?;
                // Let the clock carry the motion command to the device.
                std::thread::sleep(cycle_time * 3);
                Ok(())
            }
            Command::Demo { curve_id, points } => {
                let curve = demo_curve(curve_id, points)?;
                self.write(curve.clone())?;
                let read = self.read(curve_id)?;
                let matches = read.len() == curve.len()
                    && read
                        .curve
                        .setpoints
                        .iter()
                        .zip(&curve.curve.setpoints)
                        .all(|(a, b)| (a - b).abs() < 1e-4);
                println!("{}", serde_json::to_string_pretty(&read)?);
                if !matches {
                    return Err("read-back curve differs from written curve".into());
                }
                info!("Demo round trip of curve {} verified", curve_id);
                Ok(())
            }
            Command::Config => Ok(()),
        }
    }

    fn write(&self, curve: PositionTimeCurve) -> Result<(), BoxError> {
        self.controller.build_profile(curve)?;
        self.await_result()
    }

    fn read(&self, curve_id: u16) -> Result<PositionTimeCurve, BoxError> {
        self.controller.read_profile(curve_id)?;
        self.await_result()?;
        self.controller
            .last_read_curve()
            .ok_or_else(|| "read finished without a curve".into())
    }

    fn await_result(&self) -> Result<(), BoxError> {
        let deadline = Instant::now() + self.wait;
        while !self.controller.wait_idle(Duration::from_millis(100)) {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err("interrupted".into());
            }
            if Instant::now() >= deadline {
                warn!("Transfer still running after {}s", self.wait.as_secs());
                return Err("transfer did not finish in time".into());
            }
        }

        let snapshot = self.sink.snapshot();
        match snapshot.result {
            Some(BuildResult::Success) => {
                info!("{}", snapshot.message);
                Ok(())
            }
            _ => Err(snapshot.message.into()),
        }
    }
}

/// Cosine S-curve from 0 to 10 units over `points` samples at 10 ms.
fn demo_curve(curve_id: u16, points: usize) -> Result<PositionTimeCurve, BoxError> {
    let last = points.saturating_sub(1).max(1) as f64;
    let setpoints = (0..points)
        .map(|i| 5.0 * (1.0 - (std::f64::consts::PI * i as f64 / last).cos()))
        .collect();
    Ok(PositionTimeCurve::with_setpoints(
        "demo", curve_id, 0.01, setpoints,
    )?)
}

fn load_store(sim: &SimulatedConfigModule, path: &Path) -> Result<(), BoxError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No curve store at {} yet", path.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let curves: Vec<PositionTimeCurve> = serde_json::from_str(&content)?;
    for curve in &curves {
        sim.store_curve(curve)?;
    }
    info!("Loaded {} curves from {}", curves.len(), path.display());
    Ok(())
}

fn save_store(sim: &SimulatedConfigModule, path: &Path) -> Result<(), BoxError> {
    let curves: Vec<PositionTimeCurve> = sim
        .curve_ids()
        .into_iter()
        .filter_map(|id| sim.curve(id))
        .map(|stored| stored.to_curve())
        .collect();
    std::fs::write(path, serde_json::to_string_pretty(&curves)?)?;
    info!("Saved {} curves to {}", curves.len(), path.display());
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and config.
fn setup_tracing(args: &Args, level: LogLevel) {
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(true)
            .init();
    }
}
