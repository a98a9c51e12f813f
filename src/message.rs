//! Message header and validated message container.
//!
//! The unescaped layout of every message is
//! `[version, seq, src, dst, command blocks..., crc]`.

use heapless::Vec;

use crate::consts::{CRC_LEN, HEADER_LEN, MAX_BODY_LEN, MAX_MESSAGE_LEN, PROTOCOL_VERSION};
use crate::crc::{crc8, crc8_update};
use crate::error::RxError;

/// The fixed 4-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version, see [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Sender's sequence id, wraps at 255.
    pub seq: u8,
    /// Sender's address.
    pub src: u8,
    /// Destination address.
    pub dst: u8,
}

impl Header {
    /// Builds a header for the current protocol version.
    pub const fn new(seq: u8, src: u8, dst: u8) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            seq,
            src,
            dst,
        }
    }

    /// Wire representation.
    pub const fn to_bytes(&self) -> [u8; HEADER_LEN] {
        [self.version, self.seq, self.src, self.dst]
    }

    fn from_bytes(b: &[u8]) -> Self {
        Self {
            version: b[0],
            seq: b[1],
            src: b[2],
            dst: b[3],
        }
    }
}

/// A received message that passed length, CRC and version checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Parsed header.
    pub header: Header,
    /// Command blocks, without the CRC trailer.
    pub body: Vec<u8, MAX_BODY_LEN>,
}

impl Message {
    /// Builds a message from a header and raw command blocks.
    ///
    /// Returns `None` if `body` exceeds [`MAX_BODY_LEN`].
    pub fn new(header: Header, body: &[u8]) -> Option<Self> {
        Some(Self {
            header,
            body: Vec::from_slice(body).ok()?,
        })
    }

    /// Validates an unescaped frame.
    ///
    /// # Errors
    /// - [`RxError::Truncated`] if there is no room for a header, an opcode and a CRC
    /// - [`RxError::Crc`] if the CRC-8 over the full span is non-zero
    /// - [`RxError::UnsupportedVersion`] for any version but [`PROTOCOL_VERSION`]
    pub fn parse(raw: &[u8]) -> Result<Self, RxError> {
        if raw.len() < HEADER_LEN + 1 + CRC_LEN || raw.len() > MAX_MESSAGE_LEN {
            return Err(RxError::Truncated(raw.len()));
        }
        if crc8(raw) != 0 {
            return Err(RxError::Crc);
        }
        let header = Header::from_bytes(raw);
        if header.version != PROTOCOL_VERSION {
            return Err(RxError::UnsupportedVersion(header.version));
        }
        let body = &raw[HEADER_LEN..raw.len() - CRC_LEN];
        Ok(Self {
            header,
            body: Vec::from_slice(body).map_err(|_| RxError::Truncated(raw.len()))?,
        })
    }

    /// Opcode of the first command block.
    pub fn first_opcode(&self) -> Option<u8> {
        self.body.first().copied()
    }

    /// Serialises header, body and CRC trailer, unescaped.
    pub fn to_bytes(&self) -> Vec<u8, MAX_MESSAGE_LEN> {
        let mut out = Vec::new();
        let mut crc = 0;
        for &b in self.header.to_bytes().iter().chain(self.body.iter()) {
            crc = crc8_update(crc, b);
            // body is bounded by MAX_BODY_LEN, so this always fits
            let _ = out.push(b);
        }
        let _ = out.push(crc);
        out
    }
}
