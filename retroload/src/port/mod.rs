//! Port abstraction for serial communication.
//!
//! The protocol layers (transfer engine, monitor session) only ever see the
//! [`Port`] trait, so they can be driven by a real serial device or by a
//! simulated receiver in tests.
//!
//! ```text
//! +------------------------------------+
//! |  ProgramLoader                     |
//! |  (DeviceSession, TransferEngine)   |
//! +-----------------+------------------+
//!                   |
//!                   v
//! +-----------------+------------------+
//! |  Port trait                        |
//! +--------+------------------+--------+
//!          |                  |
//!          v                  v
//! +--------+--------+  +------+--------+
//! |   NativePort    |  | Simulated peer|
//! |  (serialport)   |  |   (tests)     |
//! +-----------------+  +---------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use retroload::port::{Port, read_byte};
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> retroload::Result<()> {
//!     port.write_all_bytes(b"\r")?;
//!     if let Some(byte) = read_byte(port, Duration::from_millis(500))? {
//!         println!("Received: 0x{byte:02X}");
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the RetroCPU UART.
pub const DEFAULT_BAUD: u32 = 9600;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Exclusively owned byte channel to the target.
///
/// Framing is always 8N1 without flow control, which is what the RetroCPU
/// UART implements.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Read a single byte, waiting at most `timeout`.
///
/// Returns `Ok(None)` when nothing arrived in time.
pub fn read_byte<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<Option<u8>> {
    if port.timeout() != timeout {
        port.set_timeout(timeout)?;
    }

    let mut buf = [0u8; 1];
    match port.read(&mut buf) {
        Ok(1) => Ok(Some(buf[0])),
        Ok(_) => Ok(None),
        Err(e) if is_timeout(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}
