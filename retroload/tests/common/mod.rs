//! Simulated RetroCPU monitor for integration tests.

#![allow(dead_code)]

use retroload::Packet;
use retroload::port::Port;
use retroload::protocol::xmodem::{PACKET_SIZE, control};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Route library logging to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();
}

/// Receive-side behaviour knobs.
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Print a prompt at all.
    pub responsive: bool,
    /// NAK this many packets before accepting any.
    pub naks: usize,
    /// Send CAN after accepting this many packets.
    pub cancel_after: Option<usize>,
    /// Acknowledge the end of transmission.
    pub ack_eot: bool,
    /// Corrupt the value reported by `E` at this address.
    pub corrupt_at: Option<u16>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            responsive: true,
            naks: 0,
            cancel_after: None,
            ack_eot: true,
            corrupt_at: None,
        }
    }
}

enum Mode {
    Command(Vec<u8>),
    Receiving { address: u16, expected: u8, packet: Vec<u8> },
}

pub struct MonitorState {
    pub memory: Vec<u8>,
    pub commands: Vec<String>,
    pub attempts: Vec<u8>,
    pub accepted: Vec<u8>,
    pub closed: bool,
    pub cancelled_by_sender: bool,
    behaviour: Behaviour,
    output: VecDeque<u8>,
    mode: Mode,
}

impl MonitorState {
    fn say(&mut self, text: &str) {
        self.output.extend(text.bytes());
    }

    fn feed(&mut self, byte: u8) {
        match &mut self.mode {
            Mode::Command(line) => {
                if byte != b'\r' {
                    line.push(byte);
                    self.output.push_back(byte);
                    return;
                }
                let line = String::from_utf8_lossy(&std::mem::take(line)).into_owned();
                self.say("\r\n");
                self.execute(line.trim());
            },
            Mode::Receiving { .. } => self.receive(byte),
        }
    }

    fn execute(&mut self, line: &str) {
        self.commands.push(line.to_string());
        let fields: Vec<&str> = line.split_whitespace().collect();
        let hex16 = |s: &str| u16::from_str_radix(s, 16).ok();

        match fields.as_slice() {
            [] => {},
            ["E", addr] => match hex16(addr) {
                Some(a) => {
                    let mut value = self.memory[usize::from(a)];
                    if self.behaviour.corrupt_at == Some(a) {
                        value = !value;
                    }
                    self.say(&format!("{a:04X}: {value:02X}\r\n"));
                },
                None => self.say("?\r\n"),
            },
            ["D", addr, value] => match (hex16(addr), u8::from_str_radix(value, 16).ok()) {
                (Some(a), Some(v)) => {
                    self.memory[usize::from(a)] = v;
                    self.say(&format!("{a:04X}: {v:02X}\r\n"));
                },
                _ => self.say("?\r\n"),
            },
            ["L", addr] => {
                if let Some(address) = hex16(addr) {
                    self.say("Ready for XMODEM\r\n");
                    self.output.push_back(control::NAK);
                    self.mode = Mode::Receiving {
                        address,
                        expected: 1,
                        packet: Vec::new(),
                    };
                    return;
                }
                self.say("?\r\n");
            },
            ["J", addr] => {
                let a = addr.to_uppercase();
                self.say(&format!(
                    "Executing at ${a}...\r\nHELLO\r\nExecution complete\r\n"
                ));
            },
            _ => self.say("?\r\n"),
        }
        self.say("> ");
    }

    fn receive(&mut self, byte: u8) {
        let Mode::Receiving {
            address,
            expected,
            packet,
        } = &mut self.mode
        else {
            return;
        };

        if packet.is_empty() && byte == control::EOT {
            let loaded = self.accepted.len() * 128;
            if self.behaviour.ack_eot {
                self.output.push_back(control::ACK);
            } else {
                self.output.push_back(control::NAK);
            }
            self.mode = Mode::Command(Vec::new());
            self.say(&format!("\r\nLoaded {loaded} bytes\r\n> "));
            return;
        }
        if packet.is_empty() && byte == control::CAN {
            self.cancelled_by_sender = true;
            self.mode = Mode::Command(Vec::new());
            return;
        }

        packet.push(byte);
        if packet.len() < PACKET_SIZE {
            return;
        }

        let wire = std::mem::take(packet);
        let decoded = Packet::decode(&wire);
        if let Ok(p) = &decoded {
            self.attempts.push(p.sequence());
        }

        if self.behaviour.naks > 0 {
            self.behaviour.naks -= 1;
            self.output.push_back(control::NAK);
            return;
        }

        match decoded {
            Ok(p) if p.sequence() == *expected => {
                let offset = usize::from(*address) + self.accepted.len() * 128;
                let end = (offset + 128).min(self.memory.len());
                self.memory[offset..end].copy_from_slice(&p.payload()[..end - offset]);
                *expected = expected.wrapping_add(1);
                self.accepted.push(p.sequence());

                if self.behaviour.cancel_after == Some(self.accepted.len()) {
                    self.output.extend([control::CAN, control::CAN]);
                    self.mode = Mode::Command(Vec::new());
                } else {
                    self.output.push_back(control::ACK);
                }
            },
            // Duplicate of the packet just accepted.
            Ok(p) if p.sequence() == expected.wrapping_sub(1) => self.output.push_back(control::ACK),
            _ => self.output.push_back(control::NAK),
        }
    }
}

/// Port backed by a simulated monitor.
#[derive(Clone)]
pub struct SimulatedMonitor {
    state: Arc<Mutex<MonitorState>>,
    timeout: Duration,
}

impl SimulatedMonitor {
    pub fn new() -> Self {
        Self::with_behaviour(Behaviour::default())
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                memory: vec![0; 0x10000],
                commands: Vec::new(),
                attempts: Vec::new(),
                accepted: Vec::new(),
                closed: false,
                cancelled_by_sender: false,
                behaviour,
                output: VecDeque::new(),
                mode: Mode::Command(Vec::new()),
            })),
            timeout: Duration::from_millis(100),
        }
    }

    /// Inspect the simulated target.
    pub fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state
            .lock()
            .unwrap()
    }
}

impl Read for SimulatedMonitor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if state.output.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedMonitor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if state.behaviour.responsive {
            for &byte in buf {
                state.feed(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedMonitor {
    fn set_timeout(&mut self, timeout: Duration) -> retroload::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> retroload::Result<()> {
        self.state().output.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn close(&mut self) -> retroload::Result<()> {
        self.state().closed = true;
        Ok(())
    }
}
