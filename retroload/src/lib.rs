//! # retroload
//!
//! A library for loading programs into a RetroCPU system through its
//! serial monitor.
//!
//! This crate provides:
//!
//! - XMODEM (128-byte, checksum) packet codec and sender
//! - A line-oriented session with the monitor (examine, deposit, run)
//! - Load address validation against the RetroCPU memory map
//! - The [`ProgramLoader`] workflow tying these together
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use retroload::{LoadRequest, LoaderConfig, ProgramLoader, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let program = std::fs::read("hello.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = retroload::NativePort::open(&SerialConfig::new("/dev/ttyACM0", 9600))?;
//!         let mut loader = ProgramLoader::new(port, LoaderConfig::default());
//!
//!         let outcome = loader.load_with_progress(
//!             &LoadRequest::new(program).at(0x0300).execute(true),
//!             |done, total| println!("Packet {done}/{total}"),
//!         )?;
//!
//!         if let Some(output) = outcome.program_output() {
//!             println!("{output}");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod address;
pub mod error;
pub mod loader;
pub mod monitor;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::native::NativePort;
pub use {
    address::{DEFAULT_LOAD_ADDRESS, USER_RAM_END, USER_RAM_START, parse_address, validate, validate_range},
    error::{AddressError, Error, LoadError, PacketError, ParseError, Phase, Result, TransferError},
    loader::{LoadMethod, LoadOutcome, LoadRequest, LoaderConfig, ProgramLoader},
    monitor::{DeviceResponse, DeviceSession, MonitorCommands, SessionConfig},
    port::{Port, SerialConfig},
    protocol::{
        transfer::{TransferConfig, TransferEngine},
        xmodem::Packet,
    },
};
