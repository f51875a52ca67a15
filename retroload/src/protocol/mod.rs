//! Protocol implementations.

pub mod transfer;
pub mod xmodem;

// Re-export common types
pub use transfer::{TransferConfig, TransferEngine, TransferSession, TransferState, Transition};
pub use xmodem::{Packet, Response, checksum, decode_ack};
