//! Wire protocol for the comms core.
//!
//! Every on-wire message is a fixed 14-byte header followed by
//! `payload_size` bytes of payload, all little-endian:
//!
//! ```text
//! [u8 kind][u8 endpoint][u64 id][u32 payload_size][payload...]
//! ```
//!
//! `kind` is 0 (`TX_ASYNC`), 1 (`TX`), or 2 (`TX_RX`). The internal `STOP`
//! sentinel (255) must never be encoded — see [`crate::message::MessageKind`].
//! No CRC, no version byte, no length prefix beyond `payload_size`.

use crate::message::{EndpointId, MessageId, MessageKind};

/// Size in bytes of the packed wire header.
pub const HEADER_LEN: usize = 14;

/// A decoded wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message kind byte (0/1/2 only — see module docs).
    pub kind: u8,
    /// Destination endpoint.
    pub endpoint: EndpointId,
    /// Sequence id (nonzero iff `kind == TX_RX`).
    pub id: MessageId,
    /// Payload length in bytes.
    pub payload_size: u32,
}

impl Header {
    /// Build the header for an outbound message.
    pub fn for_message(kind: MessageKind, endpoint: EndpointId, id: MessageId, payload_len: usize) -> Self {
        Self {
            kind: kind.wire_value(),
            endpoint,
            id,
            payload_size: payload_len as u32,
        }
    }

    /// Encode this header into its 14-byte wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.kind;
        buf[1] = self.endpoint;
        buf[2..10].copy_from_slice(&self.id.to_le_bytes());
        buf[10..14].copy_from_slice(&self.payload_size.to_le_bytes());
        buf
    }

    /// Decode a header from exactly [`HEADER_LEN`] bytes.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let kind = buf[0];
        let endpoint = buf[1];
        let id = u64::from_le_bytes(buf[2..10].try_into().expect("8-byte slice"));
        let payload_size = u32::from_le_bytes(buf[10..14].try_into().expect("4-byte slice"));
        Self { kind, endpoint, id, payload_size }
    }
}
