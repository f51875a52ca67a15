//! XMODEM packet codec (128-byte blocks, 8-bit checksum).
//!
//! ## Packet Format
//!
//! ```text
//! +-----+-----+------+--------------+----------+
//! | SOH | SEQ | ~SEQ |  DATA (128)  | CHECKSUM |
//! +-----+-----+------+--------------+----------+
//! | 1   | 1   | 1    |     128      |    1     |
//! +-----+-----+------+--------------+----------+
//! ```
//!
//! The checksum is the unweighted sum of the 128 data bytes modulo 256.
//! Short chunks are padded with `0x00` before the checksum is computed.

use crate::error::PacketError;

/// XMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge. Also sent by a checksum-mode receiver to start.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
}

/// Payload bytes per packet.
pub const PAYLOAD_SIZE: usize = 128;

/// Total bytes of a packet on the wire.
pub const PACKET_SIZE: usize = 3 + PAYLOAD_SIZE + 1;

/// Padding byte for the final short chunk.
pub const PAD_BYTE: u8 = 0x00;

/// Sequence number of the first data packet.
pub const FIRST_SEQUENCE: u8 = 1;

/// Receiver reply to a packet or end of transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Packet accepted.
    Ack,
    /// Packet rejected, resend.
    Nak,
    /// Receiver gave up.
    Cancel,
    /// Anything else (line noise, stray text).
    Unknown(u8),
}

/// Classify a single control byte.
pub fn decode_ack(byte: u8) -> Response {
    match byte {
        control::ACK => Response::Ack,
        control::NAK => Response::Nak,
        control::CAN => Response::Cancel,
        other => Response::Unknown(other),
    }
}

/// 8-bit modular sum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Number of packets needed for `len` payload bytes.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(PAYLOAD_SIZE)
}

/// Split a payload into packet-sized chunks; the last one may be short.
pub fn chunks(payload: &[u8]) -> std::slice::Chunks<'_, u8> {
    payload.chunks(PAYLOAD_SIZE)
}

/// A single XMODEM data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    sequence: u8,
    payload: [u8; PAYLOAD_SIZE],
}

impl Packet {
    /// Build a packet for `chunk`, padding it to 128 bytes.
    pub fn encode(sequence: u8, chunk: &[u8]) -> Result<Self, PacketError> {
        if chunk.is_empty() || chunk.len() > PAYLOAD_SIZE {
            return Err(PacketError::InvalidChunkSize(chunk.len()));
        }

        let mut payload = [PAD_BYTE; PAYLOAD_SIZE];
        payload[..chunk.len()].copy_from_slice(chunk);
        Ok(Self { sequence, payload })
    }

    /// Parse a packet from its wire image.
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() != PACKET_SIZE {
            return Err(PacketError::InvalidLength(bytes.len()));
        }
        if bytes[0] != control::SOH {
            return Err(PacketError::BadHeader(bytes[0]));
        }

        let sequence = bytes[1];
        let complement = bytes[2];
        if complement != !sequence {
            return Err(PacketError::BadComplement {
                sequence,
                complement,
            });
        }

        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[3..3 + PAYLOAD_SIZE]);

        let expected = checksum(&payload);
        let actual = bytes[PACKET_SIZE - 1];
        if expected != actual {
            return Err(PacketError::BadChecksum { expected, actual });
        }

        Ok(Self { sequence, payload })
    }

    /// Sequence number.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// `255 - sequence`.
    pub fn sequence_complement(&self) -> u8 {
        !self.sequence
    }

    /// Padded payload.
    pub fn payload(&self) -> &[u8; PAYLOAD_SIZE] {
        &self.payload
    }

    /// Checksum over the padded payload.
    pub fn checksum(&self) -> u8 {
        checksum(&self.payload)
    }

    /// Wire image.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        let mut out = [0u8; PACKET_SIZE];
        out[0] = control::SOH;
        out[1] = self.sequence;
        out[2] = self.sequence_complement();
        out[3..3 + PAYLOAD_SIZE].copy_from_slice(&self.payload);
        out[PACKET_SIZE - 1] = self.checksum();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_short_chunk_is_padded() {
        let packet = Packet::encode(1, &[0xA9, 0x41, 0x8D]).unwrap();
        let bytes = packet.to_bytes();

        assert_eq!(bytes.len(), PACKET_SIZE);
        assert_eq!(bytes[0], control::SOH);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 0xFE);
        assert_eq!(&bytes[3..6], &[0xA9, 0x41, 0x8D]);
        assert!(bytes[6..3 + PAYLOAD_SIZE].iter().all(|&b| b == PAD_BYTE));
        assert_eq!(bytes[131], 0xA9u8.wrapping_add(0x41).wrapping_add(0x8D));
    }

    #[test]
    fn test_encode_rejects_bad_sizes() {
        assert_eq!(
            Packet::encode(1, &[]),
            Err(PacketError::InvalidChunkSize(0))
        );
        assert_eq!(
            Packet::encode(1, &[0u8; 129]),
            Err(PacketError::InvalidChunkSize(129))
        );
        assert!(Packet::encode(1, &[0u8; 128]).is_ok());
    }

    #[test]
    fn test_complement_invariant_for_all_sequences() {
        for seq in 0..=u8::MAX {
            let packet = Packet::encode(seq, &[seq]).unwrap();
            assert_eq!(packet.sequence_complement(), 255 - seq);
            assert_eq!(packet.to_bytes()[2], 255 - seq);
        }
    }

    #[test]
    fn test_checksum_wraps() {
        let data = [0xFFu8; PAYLOAD_SIZE];
        // 128 * 255 = 32640 = 0x7F80
        assert_eq!(checksum(&data), 0x80);
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x80, 0x80, 0x01]), 0x01);
    }

    #[test]
    fn test_decode_recovers_padded_payload() {
        for len in [1usize, 24, 127, 128] {
            let chunk: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let packet = Packet::encode(42, &chunk).unwrap();
            let decoded = Packet::decode(&packet.to_bytes()).unwrap();

            let mut padded = chunk.clone();
            padded.resize(PAYLOAD_SIZE, PAD_BYTE);

            assert_eq!(decoded.sequence(), 42);
            assert_eq!(decoded.payload().as_slice(), padded.as_slice());
            assert_eq!(decoded.checksum(), checksum(&padded));
        }
    }

    #[test]
    fn test_decode_detects_corruption() {
        let bytes = Packet::encode(3, b"LDA #$41").unwrap().to_bytes();

        let mut bad = bytes;
        bad[0] = 0x02;
        assert_eq!(Packet::decode(&bad), Err(PacketError::BadHeader(0x02)));

        let mut bad = bytes;
        bad[2] = 0x00;
        assert!(matches!(
            Packet::decode(&bad),
            Err(PacketError::BadComplement { sequence: 3, .. })
        ));

        let mut bad = bytes;
        bad[10] ^= 0x01;
        assert!(matches!(
            Packet::decode(&bad),
            Err(PacketError::BadChecksum { .. })
        ));

        assert_eq!(
            Packet::decode(&bytes[..100]),
            Err(PacketError::InvalidLength(100))
        );
    }

    #[test]
    fn test_decode_ack_classification() {
        assert_eq!(decode_ack(0x06), Response::Ack);
        assert_eq!(decode_ack(0x15), Response::Nak);
        assert_eq!(decode_ack(0x18), Response::Cancel);
        assert_eq!(decode_ack(b'C'), Response::Unknown(b'C'));
        assert_eq!(decode_ack(control::EOT), Response::Unknown(0x04));
    }

    #[test]
    fn test_chunking_covers_payload() {
        for len in [1usize, 127, 128, 129, 256, 300, 1000] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let parts: Vec<&[u8]> = chunks(&payload).collect();

            assert_eq!(parts.len(), chunk_count(len));
            assert_eq!(parts.len(), len.div_ceil(128));
            assert_eq!(parts.concat(), payload);
            assert!(parts.iter().all(|c| !c.is_empty() && c.len() <= PAYLOAD_SIZE));
        }
        assert_eq!(chunk_count(0), 0);
    }
}
