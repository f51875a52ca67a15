//! Load command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use retroload::{Error, LoadMethod, LoadRequest, NativePort, ProgramLoader, SerialConfig};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, DEFAULT_PORT};
use crate::{Cli, use_fancy_output};

/// Resolved connection settings.
struct Target {
    port: String,
    baud: u32,
}

fn resolve_target(cli: &Cli, config: &Config) -> Target {
    Target {
        port: cli
            .port
            .clone()
            .or_else(|| config.connection.port.clone())
            .unwrap_or_else(|| DEFAULT_PORT.to_string()),
        baud: cli
            .baud
            .or(config.connection.baud)
            .unwrap_or(retroload::port::DEFAULT_BAUD),
    }
}

fn progress_bar(quiet: bool, method: LoadMethod) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let unit = match method {
        LoadMethod::Xmodem => "packets",
        LoadMethod::Deposit => "bytes",
    };
    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{percent}}% {{pos}}/{{len}} {unit}"
            ))
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Load command implementation.
pub(crate) fn cmd_load(cli: &Cli, config: &Config, file: &Path) -> Result<()> {
    let payload =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if payload.is_empty() {
        return Err(Error::EmptyPayload).with_context(|| format!("{} is empty", file.display()));
    }

    // Reject bad ranges before touching the port.
    retroload::validate_range(cli.address, payload.len()).map_err(Error::from)?;

    let mut loader_config = config.loader_config();
    if let Some(ms) = cli.char_delay_ms {
        loader_config.session.char_delay = Duration::from_millis(ms);
    }
    if let Some(retries) = cli.retries {
        loader_config.transfer.max_retries = retries;
    }

    let method = LoadMethod::from(cli.method);
    let request = LoadRequest::new(payload)
        .at(cli.address)
        .execute(cli.execute)
        .verify(cli.verify)
        .method(method);

    let target = resolve_target(cli, config);
    debug!("Loader settings: {loader_config:?}");

    if !cli.quiet {
        eprintln!(
            "{} Loading {} ({} bytes) at ${:04X} via {}",
            style("📦").cyan(),
            style(file.display()).bold(),
            request.payload.len(),
            request.target_address,
            style(&target.port).cyan()
        );
    }

    let port = NativePort::open(&SerialConfig::new(&target.port, target.baud))?;
    let mut loader = ProgramLoader::new(port, loader_config);

    let pb = progress_bar(cli.quiet, method);
    let result = loader.load_with_progress(&request, |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();
    let outcome = result?;

    if !cli.quiet {
        let detail = match method {
            LoadMethod::Xmodem => format!("{} packets", outcome.packets),
            LoadMethod::Deposit => "deposit".to_string(),
        };
        eprintln!(
            "{} Loaded {} bytes ({detail})",
            style("✓").green(),
            outcome.bytes_sent
        );
        if outcome.verified {
            eprintln!("{} Verified", style("✓").green());
        }
    }

    if let Some(output) = outcome.program_output() {
        if !cli.quiet {
            eprintln!(
                "{} Running at ${:04X}",
                style("▶").cyan(),
                request.target_address
            );
        }
        if !output.is_empty() {
            println!("{output}");
        }
    }

    loader
        .close()
        .context("Failed to close serial port")?;

    Ok(())
}
