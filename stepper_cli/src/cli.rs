//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "stepper", version, about = "Stepper motion CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/stepper.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Current
        } else {
            Self::None
        }
    }
}

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode on Linux before the engine thread starts.\n\nAttempts SCHED_FIFO priority, pins the process to one CPU, and calls mlockall to keep the address space in RAM. The engine thread inherits the policy and affinity. May require CAP_SYS_NICE / CAP_IPC_LOCK or root."
    )]
    pub rt: bool,
    /// Real-time priority for SCHED_FIFO (1..=max)
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking mode for --rt: none, current, or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin the process to; defaults to 0
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Move the motor to a position with a named drive style
    Move {
        /// Drive style from the config's [styles] table
        #[arg(long)]
        style: String,
        /// Target position in engineering units
        #[arg(long, allow_negative_numbers = true)]
        to: f64,
        /// Live max speed (full steps/s) once the run has started
        #[arg(long, value_name = "TPS")]
        max_tps: Option<f64>,
        /// Live acceleration (full steps/s^2) once the run has started
        #[arg(long, value_name = "TPS")]
        accel: Option<f64>,
        /// Crash-stop if the motor has not parked after this long
        #[arg(long, value_name = "MS", default_value_t = 60_000)]
        timeout_ms: u64,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Print the timing stream of a move without driving any outputs
    Trace {
        #[arg(long)]
        style: String,
        /// Target position in engineering units
        #[arg(long, allow_negative_numbers = true)]
        to: f64,
        /// Start position in engineering units (default: motor.initial_position)
        #[arg(long, allow_negative_numbers = true)]
        from: Option<f64>,
        /// Stop after this many events
        #[arg(long, default_value_t = 100_000)]
        limit: usize,
    },
    /// List the configured drive styles
    Styles,
    /// Validate the config and probe the output backend
    SelfCheck,
}
