//! XMODEM sender.
//!
//! The sender is driven by an explicit [`TransferSession`] state machine:
//!
//! ```text
//! Idle -> AwaitingReady -> Sending(1, 0) -> AwaitingAck(1, 0) --ACK--> Sending(2, 0) ...
//!                                            |  ^
//!                                      NAK / |  | resend
//!                                    timeout +--+
//! ... last ACK -> AwaitingFinish --ACK--> Completed
//!
//! CAN at any point          -> Cancelled
//! retries exhausted, timeout -> Failed(reason)
//! ```

use crate::error::{Phase, TransferError};
use crate::port::{Port, read_byte};
use crate::protocol::xmodem::{
    FIRST_SEQUENCE, Packet, Response, chunk_count, chunks, control, decode_ack,
};
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

/// Poll interval while waiting for the receiver to become ready.
const READY_POLL: Duration = Duration::from_millis(100);

/// Transfer timing and retry configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How long to wait for the receiver's initial ready byte.
    pub ready_timeout: Duration,
    /// How long to wait for the reply to a packet or to EOT.
    pub ack_timeout: Duration,
    /// Maximum attempts per packet (first send included).
    pub max_retries: u32,
    /// Gap between packet bytes. Zero writes each packet in one go.
    pub byte_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(3),
            max_retries: 10,
            byte_delay: Duration::ZERO,
        }
    }
}

/// Why a transfer session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No reply within the phase window.
    Timeout(Phase),
    /// Packet rejected `max_retries` times.
    MaxRetriesExceeded {
        /// Sequence number of the rejected packet.
        sequence: u8,
    },
    /// EOT was not acknowledged.
    IncompleteFinish,
    /// Transport failed.
    Io,
}

/// State of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing sent yet.
    Idle,
    /// Waiting for the receiver's ready byte.
    AwaitingReady,
    /// About to write a packet.
    Sending {
        /// Sequence number of the packet.
        sequence: u8,
        /// Rejected attempts so far.
        retry_count: u32,
    },
    /// Packet written, waiting for its reply.
    AwaitingAck {
        /// Sequence number of the outstanding packet.
        sequence: u8,
        /// Rejected attempts so far.
        retry_count: u32,
    },
    /// EOT written, waiting for the final Ack.
    AwaitingFinish,
    /// Every packet and the EOT were acknowledged.
    Completed,
    /// Terminal failure.
    Failed(FailureReason),
    /// Receiver sent Cancel, or the sender was interrupted.
    Cancelled,
}

impl TransferState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }
}

/// What the sender must do after a reply has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Write the same packet again.
    Resend {
        /// Rejected attempts so far.
        retry_count: u32,
    },
    /// Write the packet for the next chunk.
    Advance,
    /// All packets acknowledged; write EOT.
    Finish,
    /// EOT acknowledged.
    Complete,
}

/// Bookkeeping for one transfer.
#[derive(Debug, Clone)]
pub struct TransferSession {
    state: TransferState,
    total_packets: usize,
    acked_packets: usize,
    max_retries: u32,
}

impl TransferSession {
    /// Create a session for `total_packets` packets.
    pub fn new(total_packets: usize, max_retries: u32) -> Self {
        Self {
            state: TransferState::Idle,
            total_packets,
            acked_packets: 0,
            max_retries: max_retries.max(1),
        }
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Packets acknowledged so far.
    pub fn acked_packets(&self) -> usize {
        self.acked_packets
    }

    /// Idle -> AwaitingReady.
    pub fn begin(&mut self) {
        debug_assert_eq!(self.state, TransferState::Idle);
        self.state = TransferState::AwaitingReady;
    }

    /// Apply the outcome of the ready wait.
    pub fn on_ready(&mut self, byte: Option<u8>) -> Result<(), TransferError> {
        match byte {
            Some(control::NAK) => {
                self.state = TransferState::Sending {
                    sequence: FIRST_SEQUENCE,
                    retry_count: 0,
                };
                Ok(())
            },
            Some(control::CAN) => {
                self.state = TransferState::Cancelled;
                Err(TransferError::Aborted)
            },
            Some(other) => Err(TransferError::Protocol(format!(
                "unexpected ready byte 0x{other:02X}"
            ))),
            None => {
                self.state = TransferState::Failed(FailureReason::Timeout(Phase::AwaitReady));
                Err(TransferError::Timeout(Phase::AwaitReady))
            },
        }
    }

    /// Sending(seq, retries) -> AwaitingAck(seq, retries).
    pub fn packet_written(&mut self) {
        if let TransferState::Sending {
            sequence,
            retry_count,
        } = self.state
        {
            self.state = TransferState::AwaitingAck {
                sequence,
                retry_count,
            };
        }
    }

    /// Apply the receiver's reply to the outstanding packet.
    ///
    /// `None` means the reply window expired.
    pub fn on_reply(&mut self, reply: Option<Response>) -> Result<Transition, TransferError> {
        let TransferState::AwaitingAck {
            sequence,
            retry_count,
        } = self.state
        else {
            return Err(TransferError::Protocol(format!(
                "reply applied in state {:?}",
                self.state
            )));
        };

        match reply {
            Some(Response::Ack) => {
                self.acked_packets += 1;
                if self.acked_packets >= self.total_packets {
                    self.state = TransferState::AwaitingFinish;
                    Ok(Transition::Finish)
                } else {
                    self.state = TransferState::Sending {
                        sequence: sequence.wrapping_add(1),
                        retry_count: 0,
                    };
                    Ok(Transition::Advance)
                }
            },
            Some(Response::Cancel) => {
                self.state = TransferState::Cancelled;
                Err(TransferError::Aborted)
            },
            Some(Response::Nak | Response::Unknown(_)) | None => {
                let retry_count = retry_count + 1;
                if retry_count >= self.max_retries {
                    self.state =
                        TransferState::Failed(FailureReason::MaxRetriesExceeded { sequence });
                    Err(TransferError::MaxRetriesExceeded { sequence })
                } else {
                    self.state = TransferState::Sending {
                        sequence,
                        retry_count,
                    };
                    Ok(Transition::Resend { retry_count })
                }
            },
        }
    }

    /// Apply the reply to EOT.
    pub fn on_finish(
        &mut self,
        reply: Option<u8>,
        bytes_sent: usize,
    ) -> Result<Transition, TransferError> {
        if reply == Some(control::ACK) {
            self.state = TransferState::Completed;
            Ok(Transition::Complete)
        } else {
            self.state = TransferState::Failed(FailureReason::IncompleteFinish);
            Err(TransferError::IncompleteFinish {
                bytes_sent,
                response: reply,
            })
        }
    }

    /// Any state -> Cancelled.
    pub fn cancel(&mut self) {
        self.state = TransferState::Cancelled;
    }

    /// Any state -> Failed(Io).
    pub fn fail_io(&mut self) {
        self.state = TransferState::Failed(FailureReason::Io);
    }
}

/// XMODEM transfer engine.
pub struct TransferEngine<'a, P: Port> {
    port: &'a mut P,
    config: TransferConfig,
    interrupted: fn() -> bool,
}

impl<'a, P: Port> TransferEngine<'a, P> {
    /// Create a new engine with default configuration.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, TransferConfig::default())
    }

    /// Create a new engine with custom configuration.
    pub fn with_config(port: &'a mut P, config: TransferConfig) -> Self {
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

    /// Send `payload` and return the number of payload bytes delivered.
    ///
    /// `progress` is called with `(packets_acked, total_packets)` after each
    /// acknowledged packet.
    pub fn send<F>(&mut self, payload: &[u8], mut progress: F) -> Result<usize, TransferError>
    where
        F: FnMut(usize, usize),
    {
        if payload.is_empty() {
            return Err(TransferError::EmptyPayload);
        }

        let packets: Vec<Packet> = chunks(payload)
            .zip(std::iter::successors(Some(FIRST_SEQUENCE), |s| {
                Some(s.wrapping_add(1))
            }))
            .map(|(chunk, seq)| Packet::encode(seq, chunk))
            .collect::<Result<_, _>>()?;
        let total = chunk_count(payload.len());

        debug!(
            "Starting XMODEM transfer: {} bytes in {} packets",
            payload.len(),
            total
        );

        let mut session = TransferSession::new(total, self.config.max_retries);
        session.begin();

        let ready = self.wait_for_ready(&mut session)?;
        session.on_ready(ready)?;

        loop {
            let TransferState::Sending {
                sequence,
                retry_count,
            } = session.state()
            else {
                break;
            };
            if (self.interrupted)() {
                return Err(self.cancel(&mut session));
            }

            let packet = &packets[session.acked_packets()];
            debug_assert_eq!(packet.sequence(), sequence);
            trace!(
                "Sending packet {} (attempt {}, checksum 0x{:02X})",
                sequence,
                retry_count + 1,
                packet.checksum()
            );

            self.write(&packet.to_bytes(), &mut session)?;
            session.packet_written();

            let reply = self.read_reply(&mut session)?;
            match session.on_reply(reply.map(decode_ack)) {
                Ok(Transition::Resend { retry_count }) => {
                    warn!(
                        "Packet {sequence} not acknowledged ({}), retry {retry_count}/{}",
                        describe(reply),
                        self.config.max_retries
                    );
                },
                Ok(Transition::Advance | Transition::Finish) => {
                    trace!("Packet {sequence} ACKed");
                    progress(session.acked_packets(), total);
                },
                Ok(Transition::Complete) => break,
                Err(e) => {
                    debug!("Packet {sequence} failed: {e}");
                    return Err(e);
                },
            }
        }

        debug!("Sending EOT");
        self.write(&[control::EOT], &mut session)?;
        let reply = self.read_reply(&mut session)?;
        session.on_finish(reply, payload.len())?;

        info!("Transfer complete: {} bytes", payload.len());
        Ok(payload.len())
    }

    /// Wait for the receiver's NAK, ignoring banner text.
    fn wait_for_ready(&mut self, session: &mut TransferSession) -> Result<Option<u8>, TransferError> {
        debug!("Waiting for receiver NAK...");
        let deadline = Instant::now() + self.config.ready_timeout;

        loop {
            if (self.interrupted)() {
                return Err(self.cancel(session));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match read_byte(&mut *self.port, remaining.min(READY_POLL)) {
                Ok(Some(byte @ (control::NAK | control::CAN))) => {
                    debug!("Receiver ready byte: 0x{byte:02X}");
                    return Ok(Some(byte));
                },
                Ok(Some(byte)) => trace!("Ignoring byte while waiting for ready: 0x{byte:02X}"),
                Ok(None) => {},
                Err(e) => {
                    session.fail_io();
                    return Err(into_io(e));
                },
            }
        }
    }

    fn read_reply(&mut self, session: &mut TransferSession) -> Result<Option<u8>, TransferError> {
        read_byte(&mut *self.port, self.config.ack_timeout).map_err(|e| {
            session.fail_io();
            into_io(e)
        })
    }

    fn write(&mut self, bytes: &[u8], session: &mut TransferSession) -> Result<(), TransferError> {
        let delay = self.config.byte_delay;
        let result = if delay.is_zero() {
            self.port.write_all_bytes(bytes)
        } else {
            bytes.iter().try_for_each(|&byte| {
                let written = self.port.write_all_bytes(&[byte]);
                std::thread::sleep(delay);
                written
            })
        };
        result.map_err(|e| {
            session.fail_io();
            into_io(e)
        })
    }

    /// Tell the receiver to give up and mark the session cancelled.
    fn cancel(&mut self, session: &mut TransferSession) -> TransferError {
        warn!("Transfer interrupted, sending CAN");
        if let Err(e) = self
            .port
            .write_all_bytes(&[control::CAN, control::CAN])
        {
            debug!("Failed to send CAN: {e}");
        }
        session.cancel();
        TransferError::Interrupted
    }
}

fn describe(reply: Option<u8>) -> String {
    match reply {
        Some(control::NAK) => "NAK".to_string(),
        Some(byte) => format!("0x{byte:02X}"),
        None => "timeout".to_string(),
    }
}

fn into_io(e: crate::error::Error) -> TransferError {
    match e {
        crate::error::Error::Io(io) => TransferError::Io(io),
        other => TransferError::Io(std::io::Error::other(other.to_string())),
    }
}
