//! retroload CLI - Load programs into a RetroCPU system over its serial monitor.
//!
//! ## Features
//!
//! - XMODEM upload through the monitor's `L` command
//! - Byte-by-byte deposit fallback
//! - Optional read-back verification and execution
//! - Configuration file and environment variable support

use anyhow::Result;
use clap::{Parser, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use retroload::LoadMethod;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors raised by the CLI itself rather than the library.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Operation cancelled by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// retroload - Load programs into a RetroCPU system.
///
/// Environment variables:
///   RETROLOAD_PORT   - Default serial port (default: /dev/ttyACM0)
///   RETROLOAD_BAUD   - Default baud rate (default: 9600)
///   NO_COLOR         - Disable colored output
///   RUST_LOG         - Override log filtering
#[derive(Parser)]
#[command(name = "retroload")]
#[command(author, version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Binary program to load.
    #[arg(required_unless_present = "list_ports")]
    binary_file: Option<PathBuf>,

    /// Serial port connected to the RetroCPU monitor.
    #[arg(short, long, env = "RETROLOAD_PORT")]
    port: Option<String>,

    /// Baud rate [default: 9600].
    #[arg(short, long, env = "RETROLOAD_BAUD")]
    baud: Option<u32>,

    /// Load address (hex, e.g. 0x0300 or $0300).
    #[arg(
        short,
        long,
        default_value = "0x0300",
        value_parser = parse_address_arg
    )]
    address: u16,

    /// Run the program after loading.
    #[arg(short, long)]
    execute: bool,

    /// Read the program back and compare after loading.
    #[arg(long)]
    verify: bool,

    /// How to transfer the program.
    #[arg(long, value_enum, default_value = "xmodem")]
    method: Method,

    /// Delay between command characters, in milliseconds.
    #[arg(long, value_name = "MS")]
    char_delay_ms: Option<u64>,

    /// Attempts per XMODEM packet.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    retries: Option<u32>,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Transfer methods.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    /// XMODEM through the monitor's load command.
    Xmodem,
    /// One deposit command per byte.
    Deposit,
}

impl From<Method> for LoadMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Xmodem => LoadMethod::Xmodem,
            Method::Deposit => LoadMethod::Deposit,
        }
    }
}

fn parse_address_arg(s: &str) -> Result<u16, String> {
    retroload::parse_address(s)
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
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

    debug!(
        "retroload v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    retroload::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.list_ports {
        return commands::ports::cmd_list_ports();
    }

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let Some(file) = cli.binary_file.as_deref() else {
        anyhow::bail!("no binary file given");
    };

    let result = commands::load::cmd_load(cli, &config, file);
    if was_interrupted() {
        if let Err(e) = result {
            debug!("Load ended after interrupt: {e:#}");
            return Err(CliError::Cancelled("Interrupted by user".to_string()).into());
        }
    }
    result
}

/// Map an error to the process exit code: 2 when the port could not be
/// opened, 1 for everything else (Ctrl-C included).
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<retroload::Error>() {
        Some(e) if e.is_connection() => 2,
        _ => 1,
    }
}

fn report(err: &anyhow::Error) {
    eprintln!("{} {err}", style("Error:").red().bold());
    for cause in err.chain().skip(1) {
        eprintln!("  {} {cause}", style("caused by:").dim());
    }

    if let Some(e) = err.downcast_ref::<retroload::Error>() {
        if let Some(phase) = e.phase() {
            eprintln!("  {} {phase}", style("phase:").dim());
        }
        if let Some(sequence) = e.sequence() {
            eprintln!("  {} {sequence}", style("packet:").dim());
        }
    }
}
