//! Line-oriented session with the RetroCPU monitor.
//!
//! The monitor reads CR-terminated ASCII commands, echoes them, prints its
//! reply and finishes with a `"> "` prompt. Memory is reported as
//! `"AAAA: VV"` lines:
//!
//! ```text
//! > E 0300
//! 0300: A9
//! > D 0300 EA
//! 0300: EA
//! >
//! ```

use crate::error::{Error, ParseError, Phase, Result};
use crate::port::{Port, read_byte};
use log::{debug, trace};
use std::thread;
use std::time::{Duration, Instant};

/// Prompt printed by the monitor when it is ready for a command.
pub const PROMPT: &str = "> ";

/// Line terminator expected by the monitor.
pub const LINE_TERMINATOR: u8 = b'\r';

/// Poll interval while accumulating a response.
const READ_POLL: Duration = Duration::from_millis(50);

/// Banner the monitor prints before handing control to a program.
const RUN_BANNER: &str = "Executing at $";

/// Banner the monitor prints when a program returns.
const RUN_DONE: &str = "Execution complete";

/// Command words understood by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorCommands {
    /// Start an XMODEM receive.
    pub load: String,
    /// Jump to an address.
    pub run: String,
    /// Examine one memory cell.
    pub examine: String,
    /// Deposit one byte.
    pub deposit: String,
    /// Prompt marker that ends every response.
    pub prompt: String,
}

impl Default for MonitorCommands {
    fn default() -> Self {
        Self {
            load: "L".to_string(),
            run: "J".to_string(),
            examine: "E".to_string(),
            deposit: "D".to_string(),
            prompt: PROMPT.to_string(),
        }
    }
}

impl MonitorCommands {
    /// `L AAAA`
    pub fn load_line(&self, address: u16) -> String {
        format!("{} {address:04X}", self.load)
    }

    /// `J AAAA`
    pub fn run_line(&self, address: u16) -> String {
        format!("{} {address:04X}", self.run)
    }

    /// `E AAAA`
    pub fn examine_line(&self, address: u16) -> String {
        format!("{} {address:04X}", self.examine)
    }

    /// `D AAAA VV`
    pub fn deposit_line(&self, address: u16, value: u8) -> String {
        format!("{} {address:04X} {value:02X}", self.deposit)
    }

    /// Prompt marker; an empty one falls back to [`PROMPT`].
    pub fn prompt_marker(&self) -> &str {
        if self.prompt.is_empty() {
            PROMPT
        } else {
            &self.prompt
        }
    }
}

/// Monitor session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gap between command characters. Some receivers drop input that
    /// arrives back to back; zero writes each line in one go.
    pub char_delay: Duration,
    /// Window for examine/deposit responses and prompt waits.
    pub prompt_timeout: Duration,
    /// Command words.
    pub commands: MonitorCommands,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            char_delay: Duration::ZERO,
            prompt_timeout: Duration::from_secs(3),
            commands: MonitorCommands::default(),
        }
    }
}

/// Text captured between a command and the next prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResponse {
    text: String,
    prompt_seen: bool,
}

impl DeviceResponse {
    /// Wrap captured text.
    pub fn new(text: impl Into<String>, prompt_seen: bool) -> Self {
        Self {
            text: text.into(),
            prompt_seen,
        }
    }

    /// Raw text, prompt included.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the response ended with the prompt.
    pub fn prompt_seen(&self) -> bool {
        self.prompt_seen
    }

    /// First well-formed `AAAA: VV` line, if any.
    pub fn memory_cell(&self) -> Option<(u16, u8)> {
        self.text
            .lines()
            .find_map(parse_memory_line)
    }

    /// Output with the command echo, the trailing prompt and the monitor's
    /// run banners removed.
    pub fn body(&self, echo: &str, prompt: &str) -> String {
        let cleaned = clean_monitor_text(&self.text);
        let trimmed = cleaned
            .trim_end()
            .strip_suffix(prompt.trim_end())
            .unwrap_or(cleaned.trim_end());

        let output = trimmed
            .lines()
            .skip_while(|line| line.trim().is_empty())
            .enumerate()
            .filter(|(i, line)| !(*i == 0 && line.trim().ends_with(echo)))
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n");

        strip_run_banners(&output).to_string()
    }
}

/// Keep only the text between the run banners, when the monitor printed them.
fn strip_run_banners(text: &str) -> &str {
    let mut text = text;
    if let Some(start) = text.find(RUN_BANNER) {
        let banner = &text[start..];
        let (line, rest) = banner.split_once('\n').unwrap_or((banner, ""));
        text = match line.find("...") {
            Some(end) => &banner[end + 3..],
            None => rest,
        };
    }
    if let Some(end) = text.find(RUN_DONE) {
        text = &text[..end];
    }
    text.trim()
}

/// Parse a line of the form `AAAA: VV` anchored at the line start.
///
/// Leading whitespace is allowed; anything after the value field is ignored.
pub fn parse_memory_line(line: &str) -> Option<(u16, u8)> {
    let line = line.trim_start_matches([' ', '\t', '\r', '\n']);
    let (addr, rest) = line.split_once(':')?;
    if addr.len() != 4 || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let value = rest.split_whitespace().next()?;
    if value.len() != 2 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    Some((
        u16::from_str_radix(addr, 16).ok()?,
        u8::from_str_radix(value, 16).ok()?,
    ))
}

/// Find the value reported for `address` in a monitor response.
pub fn parse_memory_cell(response: &str, address: u16) -> std::result::Result<u8, ParseError> {
    let mut other = None;
    for (found, value) in response.lines().filter_map(parse_memory_line) {
        if found == address {
            return Ok(value);
        }
        other.get_or_insert(found);
    }

    match other {
        Some(actual) => Err(ParseError::AddressMismatch {
            expected: address,
            actual,
        }),
        None => Err(ParseError::NoMemoryLine {
            address,
            response: response.to_string(),
        }),
    }
}

/// Command/response session with the monitor.
pub struct DeviceSession<'a, P: Port> {
    port: &'a mut P,
    config: SessionConfig,
    interrupted: fn() -> bool,
}

impl<'a, P: Port> DeviceSession<'a, P> {
    /// Create a session with default settings.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, SessionConfig::default())
    }

    /// Create a session with custom settings.
    pub fn with_config(port: &'a mut P, config: SessionConfig) -> Self {
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

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Write a command line without waiting for a reply.
    pub fn issue(&mut self, text: &str) -> Result<()> {
        debug!("Monitor <- {text:?}");
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(LINE_TERMINATOR);

        if self.config.char_delay.is_zero() {
            return self.port.write_all_bytes(&line);
        }

        for byte in line {
            self.port.write_all_bytes(&[byte])?;
            thread::sleep(self.config.char_delay);
        }
        Ok(())
    }

    /// Send a command and capture everything up to the next prompt.
    ///
    /// Whatever arrived is returned even if the prompt never came; check
    /// [`DeviceResponse::prompt_seen`].
    pub fn send_command(&mut self, text: &str, timeout: Duration) -> Result<DeviceResponse> {
        self.issue(text)?;
        self.read_until_prompt(timeout)
    }

    /// Accumulate output until it ends with the prompt or `timeout` elapses.
    ///
    /// Reads one byte at a time so nothing after the prompt is consumed.
    pub fn read_until_prompt(&mut self, timeout: Duration) -> Result<DeviceResponse> {
        let deadline = Instant::now() + timeout;
        let mut raw = Vec::new();
        let mut text = String::new();

        loop {
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let Some(byte) = read_byte(&mut *self.port, remaining.min(READ_POLL))? else {
                continue;
            };
            raw.push(byte);
            text.push_str(&drain_utf8_lossy(&mut raw));

            if text.ends_with(self.config.commands.prompt_marker()) {
                trace!("Monitor -> {text:?}");
                return Ok(DeviceResponse::new(text, true));
            }
        }

        debug!("No prompt within {timeout:?}, got {text:?}");
        Ok(DeviceResponse::new(text, false))
    }

    /// Solicit a fresh prompt with a bare CR and report whether it came.
    pub fn wait_for_prompt(&mut self, timeout: Duration) -> Result<bool> {
        Ok(self
            .send_command("", timeout)?
            .prompt_seen())
    }

    /// Like [`wait_for_prompt`](Self::wait_for_prompt) but a missing prompt is an error.
    pub fn require_prompt(&mut self, timeout: Duration) -> Result<()> {
        if self.wait_for_prompt(timeout)? {
            Ok(())
        } else {
            Err(Error::Timeout(Phase::AwaitPrompt))
        }
    }

    /// Read one byte of target memory.
    pub fn examine(&mut self, address: u16) -> Result<u8> {
        let line = self.config.commands.examine_line(address);
        let response = self.send_command(&line, self.config.prompt_timeout)?;
        let value = parse_memory_cell(response.text(), address)?;
        trace!("${address:04X} = ${value:02X}");
        Ok(value)
    }

    /// Write one byte of target memory and check the monitor's echo.
    pub fn deposit(&mut self, address: u16, value: u8) -> Result<()> {
        let line = self.config.commands.deposit_line(address, value);
        let response = self.send_command(&line, self.config.prompt_timeout)?;
        let actual = parse_memory_cell(response.text(), address)?;
        if actual != value {
            return Err(ParseError::ValueMismatch {
                address,
                expected: value,
                actual,
            }
            .into());
        }
        Ok(())
    }
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('�');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Filter non-printable control characters from monitor output.
///
/// Keeps `\n`, `\t` and printable chars; `\r\n` and lone `\r` become `\n`.
pub fn clean_monitor_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}
