//! Scripted in-memory port for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// Mock serial port with separate read/write buffers.
///
/// Reads drain a scripted byte queue and report `TimedOut` once it is empty.
/// Writes are captured for inspection. `clear_buffers` keeps the script,
/// since scripted replies model the peer rather than stale line noise.
pub(crate) struct MockSerial {
    pub read_buf: VecDeque<u8>,
    pub write_buf: Vec<u8>,
    pub timeout: Duration,
    pub clears: usize,
    pub closed: bool,
}

impl MockSerial {
    pub fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            write_buf: Vec::new(),
            timeout: Duration::from_millis(1000),
            clears: 0,
            closed: false,
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.write_buf
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockSerial {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
