//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use mixer_core::ValveState;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config path used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG: &str = "etc/mixer_config.toml";

#[derive(Parser, Debug)]
#[command(name = "mixer_cli", version, about = "Gas-mixing rig controller")]
pub struct Cli {
    /// Path to config TOML (defaults to etc/mixer_config.toml when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Drive the simulated rig instead of a serial port
    #[arg(long, action = ArgAction::SetTrue)]
    pub sim: bool,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides logging.level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Valve position for manual runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ValveArg {
    Open,
    Closed,
}

impl From<ValveArg> for ValveState {
    fn from(v: ValveArg) -> Self {
        match v {
            ValveArg::Open => Self::Open,
            ValveArg::Closed => Self::Closed,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a CSV flow schedule to the end, then return to Idle
    Run {
        /// Schedule CSV: time column in seconds, then one column per MFC
        #[arg(long, value_name = "FILE")]
        schedule: PathBuf,
        /// Override schedule.resolution_s from the config
        #[arg(long, value_name = "SECONDS")]
        resolution_s: Option<f64>,
    },
    /// Hold fixed setpoints for a while, then return to Idle
    Manual {
        /// Comma-separated flow per MFC, in channel order
        #[arg(
            long,
            value_delimiter = ',',
            num_args = 1..,
            required = true,
            allow_negative_numbers = true
        )]
        setpoints: Vec<f64>,
        /// Valve position to command
        #[arg(long, value_enum, default_value = "open")]
        valve: ValveArg,
        /// How long to hold the setpoints
        #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
        duration_s: f64,
    },
    /// List serial ports and mark the one discovery would pick
    Ports,
    /// Connect, command Idle and confirm telemetry arrives
    SelfCheck,
}
