//! Constants used across the bus protocol implementation.
//!
//! This module defines the wire delimiters, reserved addresses, buffer sizing,
//! opcode values and status codes shared by every node on a bus.
//!
//! ## Key Concepts
//!
//! - **Delimiters**: `START`, `END` and `ESCAPE` frame a message on the wire.
//!   Any payload byte equal to one of them is sent as `ESCAPE, byte ^ ESCAPE`.
//! - **Headers**: Fixed 4-byte format carrying version, sequence id, source and destination.
//! - **Payload Limits**: The unescaped message (header, body and CRC) never exceeds
//!   [`MAX_MESSAGE_LEN`] bytes.
//! - **Addresses**: [`MASTER_ADDRESS`] and [`BROADCAST_ADDRESS`] are reserved, every
//!   other value is in the node pool.
//!
//! All nodes sharing a bus must agree on these values; the protocol does not
//! negotiate them.

/// Start-of-frame delimiter.
pub const FRAME_START: u8 = 0x02;

/// End-of-frame delimiter.
pub const FRAME_END: u8 = 0x03;

/// Escape delimiter. The byte following it is XOR'ed with this value.
pub const FRAME_ESCAPE: u8 = 0x10;

/// Protocol version carried in the first header byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Length (in bytes) of the fixed-length message header.
///
/// `version`, `seq`, `src`, `dst`.
pub const HEADER_LEN: usize = 4;

/// Length (in bytes) of the CRC trailer.
pub const CRC_LEN: usize = 1;

/// Maximum length (in bytes) of an unescaped message, including header and CRC.
pub const MAX_MESSAGE_LEN: usize = 64;

/// Maximum length (in bytes) of the command blocks in a single message.
pub const MAX_BODY_LEN: usize = MAX_MESSAGE_LEN - HEADER_LEN - CRC_LEN;

/// Worst case length of an encoded frame: every byte escaped, plus both delimiters.
pub const MAX_FRAME_LEN: usize = MAX_MESSAGE_LEN * 2 + 2;

/// Address of the bus coordinator.
pub const MASTER_ADDRESS: u8 = 0x00;

/// Address every node listens to.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Lowest address a node may draw for itself.
pub const NODE_ADDRESS_MIN: u8 = 0x01;

/// Highest address a node may draw for itself.
pub const NODE_ADDRESS_MAX: u8 = 0xFE;

/// Number of overheard addresses remembered as "in use".
pub const BLACKLIST_LEN: usize = 8;

/// Number of physical transmission attempts before a message is abandoned.
pub const MAX_TX_ATTEMPTS: u8 = 5;

/// Highest bitmask index the coordinator may assign.
pub const BITMASK_INDEX_MAX: u8 = 31;

/// Value reported in place of a bitmask index before one is assigned.
pub const NO_BITMASK_INDEX: u8 = 0xFF;

/// Number of console bytes buffered between the receive interrupt and the main loop.
pub const CONSOLE_QUEUE_LEN: usize = 32;

/// Command opcodes.
pub mod opcode {
    /// Coordinator asks every node to identify itself.
    pub const ROLL_CALL: u8 = 0x01;
    /// A node answering a roll call.
    pub const ROLL_CALL_RESPONSE: u8 = 0x02;
    /// Coordinator assigns a bitmask index to a node.
    pub const ASSIGN_INDEX: u8 = 0x03;
    /// First block of a mask broadcast, carrying a little-endian `u32` mask.
    pub const GROUP_SELECT: u8 = 0x04;
    /// Liveness check.
    pub const PING: u8 = 0x10;
    /// Registration and I/O summary.
    pub const GET_STATUS: u8 = 0x11;
    /// Set one LED's brightness.
    pub const SET_LED: u8 = 0x20;
    /// Read the debounced button bitmap.
    pub const GET_BUTTONS: u8 = 0x21;
    /// Move the node to a new address.
    pub const SET_ADDRESS: u8 = 0x30;
    /// Per-command error report from a node.
    pub const ERROR: u8 = 0x7F;
}

/// Status byte carried by every response block.
pub mod status {
    /// Command executed.
    pub const OK: u8 = 0x00;
    /// Payload length did not match the opcode.
    pub const LENGTH: u8 = 0x01;
    /// Opcode is not known to this node.
    pub const UNKNOWN_OPCODE: u8 = 0x02;
    /// An argument was out of range.
    pub const RANGE: u8 = 0x03;
    /// The command is not valid in the current registration state.
    pub const STATE: u8 = 0x04;
    /// The collaborator refused the command.
    pub const REJECTED: u8 = 0x05;
}
