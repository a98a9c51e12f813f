//! Error types for the bus stack.
//!
//! None of these are fatal to a node: receive errors drop the offending frame,
//! transmit errors are reported to the local caller, and address or registration
//! errors are turned into status codes in the response to the coordinator.

use thiserror::Error;

/// Why a received frame was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// Shorter than a header, one opcode and a CRC.
    #[error("frame of {0} bytes is too short to hold a message")]
    Truncated(usize),
    /// CRC-8 over the received span was not zero.
    #[error("crc mismatch")]
    Crc,
    /// The header carried a protocol version this node does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
}

impl RxError {
    /// Negative error code for C-style `length_or_negative_error` callers.
    pub const fn code(&self) -> i8 {
        match self {
            RxError::Truncated(_) => -1,
            RxError::Crc => -2,
            RxError::UnsupportedVersion(_) => -3,
        }
    }
}

/// Failures while building an outbound message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    /// `append` was called without a preceding `start`.
    #[error("no message is being built")]
    NotBuilding,
    /// A single command block cannot fit in an empty message.
    #[error("command block of {0} bytes exceeds the message body capacity")]
    BlockTooLarge(usize),
    /// Flushing a full buffer to make room failed after every retry.
    #[error("transmission abandoned after exhausting retries")]
    Abandoned,
}

/// Rejected node addresses.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// The coordinator or broadcast address.
    #[error("address {0:#04x} is reserved")]
    Reserved(u8),
    /// Overheard in use by another node.
    #[error("address {0:#04x} is blacklisted")]
    Blacklisted(u8),
}

/// Rejected registration transitions.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    /// Bitmask index outside `0..=31`.
    #[error("bitmask index {0} is out of range")]
    IndexOutOfRange(u8),
    /// The command arrived before the node took part in a roll call.
    #[error("command not valid in the current registration state")]
    WrongState,
}
