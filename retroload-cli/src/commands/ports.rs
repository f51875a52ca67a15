//! Port listing.

use anyhow::{Context, Result};
use console::style;
use retroload::NativePort;

/// List serial ports command implementation.
pub(crate) fn cmd_list_ports() -> Result<()> {
    let ports = NativePort::list_ports().context("Failed to enumerate serial ports")?;

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("(none found)").dim());
    }
    for name in &ports {
        // Port names go to stdout so they can be piped.
        println!("{name}");
    }

    Ok(())
}
