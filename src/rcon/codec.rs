//! Source RCON packet codec.
//!
//! Packets are framed as:
//! - 4 bytes: size of the rest of the packet (little-endian i32)
//! - 4 bytes: request id (little-endian i32)
//! - 4 bytes: packet type (little-endian i32)
//! - N bytes: body, null-terminated
//! - 1 byte: empty string terminator

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Client login request
pub const SERVERDATA_AUTH: i32 = 3;
/// Server reply to a login request
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
/// Client command request
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
/// Server reply carrying command output
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// id + type + two terminators
const MIN_PACKET_SIZE: usize = 10;

/// One RCON packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl RconPacket {
    pub fn auth(id: i32, password: impl Into<String>) -> Self {
        Self {
            id,
            packet_type: SERVERDATA_AUTH,
            body: password.into(),
        }
    }

    pub fn exec(id: i32, command: impl Into<String>) -> Self {
        Self {
            id,
            packet_type: SERVERDATA_EXECCOMMAND,
            body: command.into(),
        }
    }

    pub fn response(id: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type: SERVERDATA_RESPONSE_VALUE,
            body: body.into(),
        }
    }
}

/// Length-prefixed RCON codec
#[derive(Debug, Clone)]
pub struct RconCodec {
    max_length: usize,
}

impl RconCodec {
    /// Create a codec with the default max packet size (64 KiB).
    pub fn new() -> Self {
        Self {
            max_length: 64 * 1024,
        }
    }

    /// Create a codec with a custom max packet size.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Default for RconCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RconCodec {
    type Item = RconPacket;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let size = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let size = usize::try_from(size).unwrap_or(0);
        if size < MIN_PACKET_SIZE || size > self.max_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Invalid RCON packet size: {}", size),
            ));
        }

        if src.len() < 4 + size {
            src.reserve(4 + size - src.len());
            return Ok(None);
        }

        src.advance(4);
        let id = src.get_i32_le();
        let packet_type = src.get_i32_le();
        let payload = src.split_to(size - 8);

        // Body ends at the first terminator
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let body = String::from_utf8_lossy(&payload[..end]).into_owned();

        Ok(Some(RconPacket { id, packet_type, body }))
    }
}

impl Encoder<RconPacket> for RconCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RconPacket, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        if item.body.as_bytes().contains(&0) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "RCON body must not contain NUL bytes",
            ));
        }

        let size = item.body.len() + MIN_PACKET_SIZE;
        if size > self.max_length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Message too large: {} > {}", size, self.max_length),
            ));
        }

        dst.reserve(4 + size);
        dst.put_i32_le(size as i32);
        dst.put_i32_le(item.id);
        dst.put_i32_le(item.packet_type);
        dst.put_slice(item.body.as_bytes());
        dst.put_u8(0);
        dst.put_u8(0);
        Ok(())
    }
}
