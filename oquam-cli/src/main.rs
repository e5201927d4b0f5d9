//! oquam CLI - Command-line control of Oquam motorized stages.
//!
//! ## Features
//!
//! - Automatic discovery of the stage controller on any serial port
//! - Relative, absolute and keyboard-driven motion
//! - Homing, enable/disable, pause/resume
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use oquam::{GearRatio, HomingOrder};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use commands::stage::AxisMoves;
use config::Config;
use serial::ConnectOptions;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors carrying a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation, or a prompt needed in non-interactive mode.
    #[error("{0}")]
    Usage(String),
    /// The stage could not be reached.
    #[error("{0}")]
    DeviceNotFound(String),
}

/// Exit codes.
mod exit {
    pub const FAILURE: u8 = 1;
    pub const USAGE: u8 = 2;
    pub const CONFIG: u8 = 3;
    pub const DEVICE_NOT_FOUND: u8 = 4;
    pub const CANCELLED: u8 = 130;
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => exit::USAGE,
            CliError::DeviceNotFound(_) => exit::DEVICE_NOT_FOUND,
        };
    }

    match err.downcast_ref::<oquam::Error>() {
        Some(oquam::Error::Cancelled) => exit::CANCELLED,
        Some(oquam::Error::Config(_)) => exit::CONFIG,
        Some(oquam::Error::InvalidArgument(_) | oquam::Error::ScanInProgress) => exit::USAGE,
        Some(oquam::Error::NoSerialDevices | oquam::Error::NoDeviceFound { .. }) => {
            exit::DEVICE_NOT_FOUND
        },
        _ => exit::FAILURE,
    }
}

/// oquam - Control an Oquam three-axis motorized stage over serial.
///
/// Environment variables:
///   OQUAM_PORT              - Serial port (skips discovery)
///   OQUAM_BAUD              - Baud rate (default: 115200)
///   OQUAM_GEARS             - Gear ratios as "gx,gy,gz" (default: 1,1,1)
///   OQUAM_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser, Debug)]
#[command(name = "oquam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (discovered if not specified).
    #[arg(short, long, global = true, env = "OQUAM_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "OQUAM_BAUD")]
    baud: Option<u32>,

    /// Motor steps per stage step, as "gx,gy,gz" [default: 1,1,1].
    #[arg(short, long, global = true, env = "OQUAM_GEARS", value_name = "GX,GY,GZ")]
    gears: Option<GearRatio>,

    /// Identification handshake timeout in milliseconds [default: 1000].
    #[arg(long, global = true, value_name = "MS")]
    handshake_timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "OQUAM_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports in probe order.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Identify the stage controller and print its name.
    Identify,

    /// Check that the controller responds.
    Ping,

    /// Enable the motors.
    Enable,

    /// Disable the motors.
    Disable,

    /// Relative move, in stage steps.
    #[command(group(ArgGroup::new("axes").required(true).multiple(true).args(["x", "y", "z"])))]
    Move {
        /// X displacement.
        #[arg(long, allow_negative_numbers = true)]
        x: Option<i64>,

        /// Y displacement.
        #[arg(long, allow_negative_numbers = true)]
        y: Option<i64>,

        /// Z displacement.
        #[arg(long, allow_negative_numbers = true)]
        z: Option<i64>,

        /// Move duration (default: the motor-step distance, at least 10).
        #[arg(long, allow_negative_numbers = true)]
        dt: Option<i64>,
    },

    /// Absolute move, in motor steps.
    #[command(allow_negative_numbers = true)]
    MoveTo {
        /// Move duration.
        t: i64,
        /// X target.
        x: i64,
        /// Y target.
        y: i64,
        /// Z target.
        z: i64,
    },

    /// Home the axes.
    Home {
        /// Homing order, e.g. "z" or "2,-1,-1" (default: Z only).
        #[arg(long, value_parser = commands::stage::parse_homing_order, allow_hyphen_values = true)]
        order: Option<HomingOrder>,

        /// Seconds to wait after homing started.
        #[arg(long, value_name = "SECS")]
        wait: Option<u64>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Pause motion.
    Pause,

    /// Resume paused motion.
    Resume,

    /// Jog the stage with the keyboard.
    Jog {
        /// Duration of each jog move.
        #[arg(long)]
        dt: Option<i64>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if not specified).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Failed to install Ctrl-C handler: {e}");
    }
    oquam::set_interrupt_checker(was_interrupted);
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // clap prints help/version to stdout and usage errors (exit 2) itself
    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "oquam v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            if code == exit::CANCELLED {
                eprintln!("{} Cancelled", style("✗").yellow());
            } else {
                eprintln!("{} {e:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    let options = ConnectOptions::resolve(cli, &config);

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(&options.discovery, *json),
        Commands::Identify => commands::stage::cmd_identify(&options, &mut config)?,
        Commands::Ping => commands::stage::cmd_ping(&options, &mut config)?,
        Commands::Enable => commands::stage::cmd_enable(&options, &mut config, true)?,
        Commands::Disable => commands::stage::cmd_enable(&options, &mut config, false)?,
        Commands::Move { x, y, z, dt } => {
            let moves = AxisMoves {
                x: *x,
                y: *y,
                z: *z,
            };
            commands::stage::cmd_move(&options, &mut config, moves, *dt)?;
        },
        Commands::MoveTo { t, x, y, z } => {
            commands::stage::cmd_move_to(&options, &mut config, *t, [*x, *y, *z])?;
        },
        Commands::Home { order, wait, yes } => {
            commands::stage::cmd_home(&options, &mut config, *order, *wait, *yes)?;
        },
        Commands::Pause => commands::stage::cmd_pause(&options, &mut config)?,
        Commands::Resume => commands::stage::cmd_resume(&options, &mut config)?,
        Commands::Jog { dt } => commands::jog::cmd_jog(&options, &mut config, *dt)?,
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell)?,
    }

    Ok(())
}
