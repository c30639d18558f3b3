//! # wapsim
//!
//! CLI runner for the wapsim wireless access-point scenarios.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wapsim_runner::{
    format_access_report, format_delivery_report, format_energy_log, run_to_report,
    write_observations, RunReport, RunnerError,
};
use wapsim_scenario::{build_iot, build_security, IotScenarioConfig, SecurityScenarioConfig};

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string into seconds.
///
/// Accepts a plain number (`10`), a unit suffix (`10s`, `2m`, `1h`), or
/// combined units (`1h30m`).
fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }

    let mut total_seconds: f64 = 0.0;
    let mut current_number = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            current_number.push(c);
        } else {
            if current_number.is_empty() {
                return Err(format!("Invalid duration format: unexpected '{}' in '{}'", c, s));
            }

            let value: f64 = current_number
                .parse()
                .map_err(|_| format!("Invalid number '{}' in duration '{}'", current_number, s))?;

            let multiplier = match c {
                's' => 1.0,
                'm' => 60.0,
                'h' => 3600.0,
                _ => return Err(format!("Unknown duration unit '{}' in '{}'. Use s, m, or h.", c, s)),
            };

            total_seconds += value * multiplier;
            current_number.clear();
        }
    }

    if !current_number.is_empty() {
        let value: f64 = current_number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", current_number, s))?;
        total_seconds += value;
    }

    if total_seconds == 0.0 && !s.is_empty() {
        return Err(format!("Invalid duration format: '{}'", s));
    }

    Ok(total_seconds)
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// wapsim - wireless access point scenario simulator
#[derive(Parser, Debug)]
#[command(name = "wapsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the IoT energy and packet-delivery scenario
    Iot(IotArgs),
    /// Run the allow-list access-control scenario
    Security(SecurityArgs),
}

/// Options shared by every scenario run.
#[derive(Parser, Debug)]
pub struct CommonArgs {
    /// Random seed (default: random)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Write the observation log as JSON to this file
    #[arg(short = 'o', long, value_name = "FILE")]
    pub trace: Option<PathBuf>,

    /// Print the run summary as JSON instead of the text report
    #[arg(long)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments for the IoT scenario.
///
/// A YAML config file provides the base values; CLI flags override fields
/// individually.
#[derive(Parser, Debug)]
pub struct IotArgs {
    /// Path to a YAML scenario configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of IoT devices (default: 20)
    #[arg(long)]
    pub devices: Option<u32>,

    /// Simulation duration. Accepts plain seconds or units: 10, 10s, 2m
    /// (default: 10s)
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Initial energy per device in joules (default: 1.0)
    #[arg(long)]
    pub initial_energy: Option<f64>,

    /// Device placement radius around the hub in meters (default: 30)
    #[arg(long)]
    pub distance: Option<f64>,

    /// Packets per second per device (default: 1)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Payload size in bytes (default: 512)
    #[arg(long)]
    pub packet_size: Option<u32>,

    /// Write the energy level history as CSV to this file
    #[arg(long, value_name = "FILE")]
    pub energy_log: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl IotArgs {
    /// Load the YAML config if given, then apply CLI overrides.
    fn resolve(&self) -> Result<IotScenarioConfig, RunnerError> {
        let mut config = match &self.config {
            Some(path) => IotScenarioConfig::from_yaml_file(path)?,
            None => IotScenarioConfig::default(),
        };
        if let Some(devices) = self.devices {
            config.devices = devices;
        }
        if let Some(duration) = self.duration {
            config.duration_s = duration;
        }
        if let Some(energy) = self.initial_energy {
            config.initial_energy_j = energy;
        }
        if let Some(distance) = self.distance {
            config.distance_m = distance;
        }
        if let Some(rate) = self.rate {
            config.packet_rate = rate;
        }
        if let Some(size) = self.packet_size {
            config.packet_size = size;
        }
        Ok(config)
    }
}

/// Arguments for the access-control scenario.
#[derive(Parser, Debug)]
pub struct SecurityArgs {
    /// Path to a YAML scenario configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Simulation duration. Accepts plain seconds or units: 3, 3s
    /// (default: 3s)
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Client placement radius around the hub in meters (default: 10)
    #[arg(long)]
    pub distance: Option<f64>,

    #[command(flatten)]
    pub common: CommonArgs,
}

impl SecurityArgs {
    fn resolve(&self) -> Result<SecurityScenarioConfig, RunnerError> {
        let mut config = match &self.config {
            Some(path) => SecurityScenarioConfig::from_yaml_file(path)?,
            None => SecurityScenarioConfig::default(),
        };
        if let Some(duration) = self.duration {
            config.duration_s = duration;
        }
        if let Some(distance) = self.distance {
            config.distance_m = distance;
        }
        Ok(config)
    }
}

// ============================================================================
// Scenario Execution
// ============================================================================

fn pick_seed(common: &CommonArgs) -> u64 {
    let seed = common.seed.unwrap_or_else(|| {
        use rand::Rng;
        rand::thread_rng().gen()
    });
    if common.verbose {
        eprintln!("Using seed: {}", seed);
    }
    seed
}

fn emit_outputs(report: &RunReport, common: &CommonArgs) -> Result<(), RunnerError> {
    if let Some(ref path) = common.trace {
        let mut file = std::fs::File::create(path)?;
        write_observations(&report.observations, &mut file)?;
        if common.verbose {
            eprintln!("Wrote {} observations to {}", report.observations.len(), path.display());
        }
    }
    if common.json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    }
    Ok(())
}

fn run_iot(args: IotArgs) -> Result<(), RunnerError> {
    let config = args.resolve()?;
    let seed = pick_seed(&args.common);

    let scenario = build_iot(&config, seed)?;
    if args.common.verbose {
        eprintln!(
            "Built IoT scenario: {} devices, {:.1}s, {} offered packets",
            config.devices,
            config.duration_s,
            scenario.schedule.total_offered()
        );
    }

    let report = run_to_report(scenario, seed)?;

    if let Some(ref path) = args.energy_log {
        std::fs::write(path, format_energy_log(&report.observations))?;
        if args.common.verbose {
            eprintln!("Wrote energy log to {}", path.display());
        }
    }
    emit_outputs(&report, &args.common)?;
    if !args.common.json {
        print!("{}", format_delivery_report(&report.summary));
    }
    Ok(())
}

fn run_security(args: SecurityArgs) -> Result<(), RunnerError> {
    let config = args.resolve()?;
    let seed = pick_seed(&args.common);

    let scenario = build_security(&config, seed)?;
    if args.common.verbose {
        let hub = scenario.topology.hub();
        eprintln!("Hub IP: {}", hub.address);
        for info in &scenario.node_infos {
            eprintln!("  {}: {}", info.name, info.address);
        }
    }

    let report = run_to_report(scenario, seed)?;

    emit_outputs(&report, &args.common)?;
    if !args.common.json {
        print!("{}", format_access_report(&report.summary));
    }
    Ok(())
}

fn main() -> Result<(), RunnerError> {
    // Initialize tracing subscriber with RUST_LOG env filter.
    // Default to "warn" level if RUST_LOG is not set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Iot(args) => run_iot(args),
        Commands::Security(args) => run_security(args),
    }
}
