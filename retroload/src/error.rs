//! Error types for retroload.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for retroload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Alias used by the program loader contract.
pub type LoadError = Error;

/// Protocol phase in which a bounded wait expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Waiting for the receiver's initial ready byte.
    AwaitReady,
    /// Waiting for the Ack/Nak of a data packet.
    AwaitAck,
    /// Waiting for the Ack of the end-of-transmission byte.
    AwaitFinish,
    /// Waiting for the monitor prompt.
    AwaitPrompt,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitReady => "waiting for receiver ready",
            Self::AwaitAck => "waiting for packet acknowledgement",
            Self::AwaitFinish => "waiting for end-of-transmission acknowledgement",
            Self::AwaitPrompt => "waiting for monitor prompt",
        };
        f.write_str(name)
    }
}

/// Load address rejected by the address validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Address falls in zero page, stack or monitor work area.
    #[error("address ${0:04X} is below $0200 (zero page / stack region)")]
    TooLow(u16),

    /// Address (or the end of the program) falls in ROM or I/O space.
    #[error("address ${0:04X} is above $7FFF (ROM / I/O window)")]
    InReservedSpace(u16),
}

/// Packet construction or parsing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Chunk is empty or longer than one packet payload.
    #[error("invalid chunk size: {0} bytes (expected 1..=128)")]
    InvalidChunkSize(usize),

    /// Wire image does not have packet length.
    #[error("invalid packet length: {0} bytes")]
    InvalidLength(usize),

    /// First byte is not the start-of-packet marker.
    #[error("bad packet header: 0x{0:02X}")]
    BadHeader(u8),

    /// Sequence complement does not match the sequence number.
    #[error("sequence complement mismatch for packet {sequence}: 0x{complement:02X}")]
    BadComplement {
        /// Sequence number found in the packet.
        sequence: u8,
        /// Complement byte found in the packet.
        complement: u8,
    },

    /// Trailing checksum does not match the payload.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    BadChecksum {
        /// Checksum computed over the payload.
        expected: u8,
        /// Checksum carried by the packet.
        actual: u8,
    },
}

/// Monitor response could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// No `ADDR: VALUE` line for the requested address.
    #[error("no memory line for ${address:04X} in response {response:?}")]
    NoMemoryLine {
        /// Address that was requested.
        address: u16,
        /// Raw response text.
        response: String,
    },

    /// Memory line reports another address.
    #[error("response reports ${actual:04X}, expected ${expected:04X}")]
    AddressMismatch {
        /// Address that was requested.
        expected: u16,
        /// Address found in the response.
        actual: u16,
    },

    /// Memory line reports another value.
    #[error("${address:04X} holds ${actual:02X}, expected ${expected:02X}")]
    ValueMismatch {
        /// Address of the cell.
        address: u16,
        /// Value that was deposited.
        expected: u8,
        /// Value echoed by the monitor.
        actual: u8,
    },
}

/// Terminal failure of the packet transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No response within the phase window.
    #[error("timeout while {0}")]
    Timeout(Phase),

    /// Receiver sent Cancel.
    #[error("transfer aborted by receiver")]
    Aborted,

    /// A single packet was rejected too many times.
    #[error("packet {sequence} not acknowledged after maximum retries")]
    MaxRetriesExceeded {
        /// Sequence number of the failing packet.
        sequence: u8,
    },

    /// Every packet was acknowledged but the end of transmission was not.
    #[error("end of transmission not acknowledged ({bytes_sent} bytes delivered, response {response:?})")]
    IncompleteFinish {
        /// Payload bytes acknowledged by the receiver.
        bytes_sent: usize,
        /// Byte received instead of Ack, if any.
        response: Option<u8>,
    },

    /// Unexpected control byte sequence.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Interrupted by the embedding application.
    #[error("transfer interrupted")]
    Interrupted,

    /// Nothing to send.
    #[error("payload is empty")]
    EmptyPayload,

    /// Packet could not be built.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
}

impl TransferError {
    /// Sequence number of the failing packet, when the error is tied to one.
    pub fn sequence(&self) -> Option<u8> {
        match self {
            Self::MaxRetriesExceeded { sequence } => Some(*sequence),
            _ => None,
        }
    }
}

/// Error type for retroload operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port could not be opened or closed.
    #[error("cannot open {port}: {message}")]
    Connection {
        /// Port name/path.
        port: String,
        /// Underlying failure description.
        message: String,
    },

    /// Serial port error after the port was opened.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No response within the phase window.
    #[error("timeout while {0}")]
    Timeout(Phase),

    /// Load address rejected.
    #[error("invalid load address: {0}")]
    Address(#[from] AddressError),

    /// Packet transfer failed.
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// Monitor response could not be parsed.
    #[error("unexpected monitor response: {0}")]
    Parse(#[from] ParseError),

    /// Read-back differs from the payload.
    #[error("verification mismatch at offset {offset}: expected ${expected:02X}, read ${actual:02X}")]
    VerificationMismatch {
        /// Offset into the payload.
        offset: usize,
        /// Payload byte.
        expected: u8,
        /// Byte read from the target.
        actual: u8,
    },

    /// Nothing to load.
    #[error("program is empty")]
    EmptyPayload,

    /// Interrupted by the embedding application.
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// Phase in which the load failed, when known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Timeout(phase) | Self::Transfer(TransferError::Timeout(phase)) => Some(*phase),
            Self::Transfer(TransferError::MaxRetriesExceeded { .. }) => Some(Phase::AwaitAck),
            Self::Transfer(TransferError::IncompleteFinish { .. }) => Some(Phase::AwaitFinish),
            _ => None,
        }
    }

    /// Sequence number of the failing packet, when known.
    pub fn sequence(&self) -> Option<u8> {
        match self {
            Self::Transfer(e) => e.sequence(),
            _ => None,
        }
    }

    /// Whether the error means the transport could not be opened.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
