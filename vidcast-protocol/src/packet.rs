//! Packet framing and control messages
//!
//! Media and sentinel datagrams share one framing: a 4-byte big-endian
//! sequence number followed by the payload. Control messages used for
//! registration travel unframed, as bare ASCII literals.
//!
//! ```text
//! framed:   | seq (u32, BE) | payload (<= MAX_PAYLOAD_SIZE) |
//! control:  | "registerclient" | "registerclientok" | ... |
//! ```
//!
//! Sentinels are recognised by exact payload equality before the payload is
//! treated as media. A media chunk that happens to equal a sentinel literal
//! byte-for-byte is therefore read as that sentinel; this ambiguity is part
//! of the wire format.
//!
//! Control literals are matched against the whole datagram before any frame
//! is decoded, which gives a second ambiguity: a media datagram whose
//! sequence header and payload together spell a control literal (for
//! example seq `0x72656769` carrying `sterclient`) is read as that control
//! message.

use crate::sequence::SeqNumber;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the sequence number prefix in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest datagram either side sends or expects (MTU 1500 - 28 IP/UDP)
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Maximum media payload per packet
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

/// In-band control signals carried as the payload of a framed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// End of one stream in broadcast mode; receivers reset and keep going
    EndOfStream,
    /// Start of a stream in session mode
    StreamStart,
    /// End of a stream in session mode; receivers terminate
    StreamShutdown,
}

impl Sentinel {
    pub const ALL: [Sentinel; 3] = [
        Sentinel::EndOfStream,
        Sentinel::StreamStart,
        Sentinel::StreamShutdown,
    ];

    /// Literal payload bytes
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Sentinel::EndOfStream => b"END_OF_STREAM",
            Sentinel::StreamStart => b"streamstart",
            Sentinel::StreamShutdown => b"streamshutdown",
        }
    }

    /// Match a payload against the sentinel literals
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_bytes() == payload)
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Registration handshake messages (sent without a sequence prefix)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    RegisterClient,
    RegisterClientOk,
    DeregisterUser,
    DeregisterUserOk,
}

impl ControlMessage {
    pub const ALL: [ControlMessage; 4] = [
        ControlMessage::RegisterClient,
        ControlMessage::RegisterClientOk,
        ControlMessage::DeregisterUser,
        ControlMessage::DeregisterUserOk,
    ];

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            ControlMessage::RegisterClient => b"registerclient",
            ControlMessage::RegisterClientOk => b"registerclientok",
            ControlMessage::DeregisterUser => b"deregisteruser",
            ControlMessage::DeregisterUserOk => b"deregisteruserok",
        }
    }

    /// Parse a whole datagram as a control message
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_bytes() == datagram)
    }

    /// The reply the server owes for this request, if any
    pub fn reply(self) -> Option<ControlMessage> {
        match self {
            ControlMessage::RegisterClient => Some(ControlMessage::RegisterClientOk),
            ControlMessage::DeregisterUser => Some(ControlMessage::DeregisterUserOk),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// A framed packet: sequence number plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: SeqNumber,
    pub payload: Bytes,
}

impl Packet {
    /// Create a media packet, rejecting oversized payloads
    pub fn new(seq: SeqNumber, payload: Bytes) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Packet { seq, payload })
    }

    /// Create a sentinel packet
    pub fn sentinel(seq: SeqNumber, sentinel: Sentinel) -> Self {
        Packet {
            seq,
            payload: Bytes::from_static(sentinel.as_bytes()),
        }
    }

    /// Total size on the wire
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u32(self.seq.as_raw());
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a framed packet from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::Malformed {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let seq = SeqNumber::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(Packet {
            seq,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }

    /// Sentinel carried by this packet, if any
    pub fn as_sentinel(&self) -> Option<Sentinel> {
        Sentinel::from_payload(&self.payload)
    }
}

/// A decoded framed datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Media(Packet),
    Sentinel { seq: SeqNumber, sentinel: Sentinel },
}

impl Frame {
    /// Decode a framed datagram, checking for sentinels first
    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let packet = Packet::from_bytes(bytes)?;
        Ok(match packet.as_sentinel() {
            Some(sentinel) => Frame::Sentinel {
                seq: packet.seq,
                sentinel,
            },
            None => Frame::Media(packet),
        })
    }

    pub fn seq(&self) -> SeqNumber {
        match self {
            Frame::Media(p) => p.seq,
            Frame::Sentinel { seq, .. } => *seq,
        }
    }
}

/// Any datagram an endpoint can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Control(ControlMessage),
    Frame(Frame),
}

impl Datagram {
    /// Classify a raw datagram: control literals first, framed packets otherwise
    pub fn classify(bytes: &[u8]) -> Result<Self, PacketError> {
        if let Some(msg) = ControlMessage::parse(bytes) {
            return Ok(Datagram::Control(msg));
        }
        Frame::decode(bytes).map(Datagram::Frame)
    }
}

/// Packet parsing and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Malformed packet: expected at least {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let packet = Packet::new(SeqNumber::new(0x0000_0102), Bytes::from_static(b"abc")).unwrap();
        assert_eq!(&packet.to_bytes()[..], &[0, 0, 1, 2, b'a', b'b', b'c']);
    }

    #[test]
    fn test_decode_short_input() {
        let err = Packet::from_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            PacketError::Malformed {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_decode_header_only() {
        let packet = Packet::from_bytes(&[0, 0, 0, 7]).unwrap();
        assert_eq!(packet.seq, SeqNumber::new(7));
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_payload_too_large() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            Packet::new(SeqNumber::new(1), payload),
            Err(PacketError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_sentinel_detection() {
        for sentinel in Sentinel::ALL {
            let bytes = Packet::sentinel(SeqNumber::new(9), sentinel).to_bytes();
            assert_eq!(
                Frame::decode(&bytes).unwrap(),
                Frame::Sentinel {
                    seq: SeqNumber::new(9),
                    sentinel
                }
            );
        }
    }

    #[test]
    fn test_sentinel_prefix_is_media() {
        let bytes = Packet::new(SeqNumber::new(3), Bytes::from_static(b"END_OF_STREAMX"))
            .unwrap()
            .to_bytes();
        assert!(matches!(Frame::decode(&bytes).unwrap(), Frame::Media(_)));
    }

    #[test]
    fn test_control_messages() {
        for msg in ControlMessage::ALL {
            assert_eq!(Datagram::classify(msg.as_bytes()).unwrap(), Datagram::Control(msg));
        }
        assert_eq!(
            ControlMessage::RegisterClient.reply(),
            Some(ControlMessage::RegisterClientOk)
        );
        assert_eq!(ControlMessage::RegisterClientOk.reply(), None);
    }

    #[test]
    fn test_classify_malformed() {
        assert!(Datagram::classify(b"ab").is_err());
    }

    #[test]
    fn test_frame_spelling_a_control_literal_is_control() {
        let seq = SeqNumber::from_be_bytes(*b"regi");
        let wire = Packet::new(seq, Bytes::from_static(b"sterclient"))
            .unwrap()
            .to_bytes();
        assert_eq!(
            Datagram::classify(&wire).unwrap(),
            Datagram::Control(ControlMessage::RegisterClient)
        );
    }
}
