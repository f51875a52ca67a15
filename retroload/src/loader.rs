//! Program loading workflow.
//!
//! A load is a short conversation with the monitor:
//!
//! 1. check the target range lies in user RAM
//! 2. solicit a prompt
//! 3. `L AAAA` and an XMODEM transfer (or one `D AAAA VV` per byte)
//! 4. optionally read every byte back with `E AAAA`
//! 5. optionally `J AAAA`

use crate::address::{self, DEFAULT_LOAD_ADDRESS};
use crate::error::{Error, Result, TransferError};
use crate::monitor::{DeviceResponse, DeviceSession, SessionConfig};
use crate::port::Port;
use crate::protocol::transfer::{TransferConfig, TransferEngine};
use crate::protocol::xmodem::chunk_count;
use log::{debug, info, warn};
use std::time::Duration;

/// How the payload reaches target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LoadMethod {
    /// `L AAAA` followed by an XMODEM transfer.
    #[default]
    Xmodem,
    /// One deposit command per byte.
    Deposit,
}

/// What to load and what to do afterwards.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// First byte of the program in target memory.
    pub target_address: u16,
    /// Program image.
    pub payload: Vec<u8>,
    /// Jump to `target_address` after loading.
    pub execute: bool,
    /// Read every byte back after loading.
    pub verify: bool,
    /// Delivery method.
    pub method: LoadMethod,
}

impl LoadRequest {
    /// Load `payload` at the default address without running it.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            target_address: DEFAULT_LOAD_ADDRESS,
            payload: payload.into(),
            execute: false,
            verify: false,
            method: LoadMethod::default(),
        }
    }

    /// Set the load address.
    #[must_use]
    pub fn at(mut self, address: u16) -> Self {
        self.target_address = address;
        self
    }

    /// Run the program after loading.
    #[must_use]
    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    /// Read the program back after loading.
    #[must_use]
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Choose the delivery method.
    #[must_use]
    pub fn method(mut self, method: LoadMethod) -> Self {
        self.method = method;
        self
    }
}

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Payload bytes delivered.
    pub bytes_sent: usize,
    /// XMODEM packets acknowledged (zero for deposit loads).
    pub packets: usize,
    /// Whether the image was read back and matched.
    pub verified: bool,
    /// Monitor output after the run command.
    pub run_response: Option<DeviceResponse>,
    run_command: String,
    prompt: String,
}

impl LoadOutcome {
    /// Program output with the command echo and trailing prompt removed.
    pub fn program_output(&self) -> Option<String> {
        self.run_response
            .as_ref()
            .map(|r| r.body(&self.run_command, &self.prompt))
    }
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// XMODEM timing and retries.
    pub transfer: TransferConfig,
    /// Monitor pacing, prompt window and command words.
    pub session: SessionConfig,
    /// How long to collect output after the run command.
    pub run_timeout: Duration,
    /// Accept a load whose packets were all acknowledged but whose EOT was not.
    pub tolerate_incomplete_finish: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            session: SessionConfig::default(),
            run_timeout: Duration::from_secs(5),
            tolerate_incomplete_finish: false,
        }
    }
}

/// Loads programs into target memory through the monitor.
///
/// The loader owns the port and closes it when dropped.
pub struct ProgramLoader<P: Port> {
    port: P,
    config: LoaderConfig,
    interrupted: fn() -> bool,
}

impl<P: Port> ProgramLoader<P> {
    /// Create a loader over an open port.
    pub fn new(port: P, config: LoaderConfig) -> Self {
        Self {
            port,
            config,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Replace the interruption check (defaults to the process-wide checker).
    #[must_use]
    pub fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupted = check;
        self
    }

    /// Loader settings.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Load a program without progress reporting.
    pub fn load(&mut self, request: &LoadRequest) -> Result<LoadOutcome> {
        self.load_with_progress(request, |_, _| {})
    }

    /// Load a program.
    ///
    /// `progress` is called with `(done, total)`: packets for XMODEM loads,
    /// bytes for deposit loads.
    pub fn load_with_progress<F>(&mut self, request: &LoadRequest, progress: F) -> Result<LoadOutcome>
    where
        F: FnMut(usize, usize),
    {
        let address = request.target_address;
        let payload = request.payload.as_slice();

        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        address::validate_range(address, payload.len())?;

        info!(
            "Loading {} bytes at ${address:04X} via {:?}",
            payload.len(),
            request.method
        );

        self.port.clear_buffers()?;
        let prompt_timeout = self.config.session.prompt_timeout;
        self.session().require_prompt(prompt_timeout)?;

        let (bytes_sent, packets) = match request.method {
            LoadMethod::Xmodem => self.send_xmodem(address, payload, progress)?,
            LoadMethod::Deposit => self.send_deposit(address, payload, progress)?,
        };

        if request.verify {
            self.verify(address, payload)?;
        }

        let run_command = self.config.session.commands.run_line(address);
        let run_response = if request.execute {
            info!("Running program at ${address:04X}");
            let run_timeout = self.config.run_timeout;
            let response = self.session().send_command(&run_command, run_timeout)?;
            if !response.prompt_seen() {
                debug!("Program still running after {run_timeout:?}");
            }
            Some(response)
        } else {
            None
        };

        Ok(LoadOutcome {
            bytes_sent,
            packets,
            verified: request.verify,
            run_response,
            run_command,
            prompt: self
                .config
                .session
                .commands
                .prompt_marker()
                .to_string(),
        })
    }

    /// Close the port. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    fn session(&mut self) -> DeviceSession<'_, P> {
        DeviceSession::with_config(&mut self.port, self.config.session.clone())
            .with_interrupt_check(self.interrupted)
    }

    fn send_xmodem<F>(&mut self, address: u16, payload: &[u8], progress: F) -> Result<(usize, usize)>
    where
        F: FnMut(usize, usize),
    {
        let load_command = self.config.session.commands.load_line(address);
        self.session().issue(&load_command)?;

        let sent = TransferEngine::with_config(&mut self.port, self.config.transfer.clone())
            .with_interrupt_check(self.interrupted)
            .send(payload, progress);

        let bytes_sent = match sent {
            Ok(n) => n,
            Err(TransferError::IncompleteFinish {
                bytes_sent,
                response,
            }) if self.config.tolerate_incomplete_finish => {
                warn!(
                    "End of transmission not acknowledged (response {response:?}), continuing with {bytes_sent} bytes"
                );
                bytes_sent
            },
            Err(TransferError::Interrupted) => return Err(Error::Interrupted),
            Err(e) => return Err(e.into()),
        };

        let prompt_timeout = self.config.session.prompt_timeout;
        let completion = self.session().read_until_prompt(prompt_timeout)?;
        if completion.prompt_seen() {
            debug!("Monitor after transfer: {:?}", completion.text());
        } else {
            warn!("No prompt after transfer, got {:?}", completion.text());
        }

        Ok((bytes_sent, chunk_count(payload.len())))
    }

    fn send_deposit<F>(&mut self, address: u16, payload: &[u8], mut progress: F) -> Result<(usize, usize)>
    where
        F: FnMut(usize, usize),
    {
        let mut session = self.session();
        for (offset, &byte) in payload.iter().enumerate() {
            session.deposit(cell(address, offset), byte)?;
            progress(offset + 1, payload.len());
        }
        Ok((payload.len(), 0))
    }

    fn verify(&mut self, address: u16, payload: &[u8]) -> Result<()> {
        debug!("Verifying {} bytes at ${address:04X}", payload.len());
        let mut session = self.session();
        for (offset, &expected) in payload.iter().enumerate() {
            let actual = session.examine(cell(address, offset))?;
            if actual != expected {
                return Err(Error::VerificationMismatch {
                    offset,
                    expected,
                    actual,
                });
            }
        }
        info!("Verified {} bytes", payload.len());
        Ok(())
    }
}

impl<P: Port> Drop for ProgramLoader<P> {
    fn drop(&mut self) {
        if let Err(e) = self.port.close() {
            debug!("Error closing {}: {e}", self.port.name());
        }
    }
}

/// Address of `offset` within a range already checked by `validate_range`.
#[allow(clippy::cast_possible_truncation)]
fn cell(address: u16, offset: usize) -> u16 {
    address.wrapping_add(offset as u16)
}
