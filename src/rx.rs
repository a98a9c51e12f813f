//! Byte-at-a-time frame receiver.
//!
//! This module implements the receive side of the framing codec as a small
//! state machine. It is designed to run from the serial receive interrupt:
//! every call to [`RxAssembler::feed`] is O(1), never blocks and never
//! allocates.
//!
//! ```text
//!             START                 ESCAPE
//! Listening ---------> Receiving <----------> Escaping
//!     ^                 |   |     any byte
//!     |       END       |   | buffer full
//!     +-----------------+   v
//!     ^               Discarding
//!     |       END         |
//!     +-------------------+
//! ```
//!
//! A `START` byte resets the receive buffer from any state, so a frame cut
//! short by a dropped byte is abandoned as soon as the next frame begins.

use heapless::Vec;

use crate::consts::{FRAME_END, FRAME_ESCAPE, FRAME_START, MAX_MESSAGE_LEN};
use crate::encoding::unescape;

/// Receive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxState {
    /// Between frames. Bytes that are not `START` belong to the console.
    #[default]
    Listening,
    /// Inside a frame, collecting payload bytes.
    Receiving,
    /// The previous byte was an escape delimiter.
    Escaping,
    /// The current frame overflowed the buffer; everything up to its end is dropped.
    Discarding,
}

/// The outcome of feeding one byte.
#[derive(Debug, PartialEq, Eq)]
pub enum Feed<'a> {
    /// Byte consumed, nothing to report.
    Pending,
    /// A byte outside any frame, destined for the console.
    Console(u8),
    /// A frame ended. The slice holds its unescaped payload.
    Complete(&'a [u8]),
    /// The current frame just overflowed the receive buffer.
    Overflow,
    /// A frame ended that had overflowed, and was dropped.
    Dropped,
}

/// Reconstructs unescaped frame payloads from raw bus bytes.
#[derive(Debug)]
pub struct RxAssembler {
    state: RxState,
    buf: Vec<u8, MAX_MESSAGE_LEN>,
}

impl Default for RxAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl RxAssembler {
    /// Creates an assembler in the [`RxState::Listening`] state.
    pub const fn new() -> Self {
        Self {
            state: RxState::Listening,
            buf: Vec::new(),
        }
    }

    /// Current receive state.
    pub fn state(&self) -> RxState {
        self.state
    }

    /// `true` when no frame is in progress.
    pub fn is_listening(&self) -> bool {
        self.state == RxState::Listening
    }

    /// Abandons any frame in progress, used by the bus-silence watchdog.
    pub fn reset(&mut self) {
        self.state = RxState::Listening;
        self.buf.clear();
    }

    /// Consumes one raw bus byte.
    pub fn feed(&mut self, byte: u8) -> Feed<'_> {
        if byte == FRAME_START {
            self.buf.clear();
            self.state = RxState::Receiving;
            return Feed::Pending;
        }

        match self.state {
            RxState::Listening => Feed::Console(byte),
            RxState::Receiving => match byte {
                FRAME_END => {
                    self.state = RxState::Listening;
                    Feed::Complete(&self.buf)
                }
                FRAME_ESCAPE => {
                    self.state = RxState::Escaping;
                    Feed::Pending
                }
                b => self.store(b),
            },
            RxState::Escaping => {
                // An END here means the escape was cut short; treat it as a frame end
                // so the bus resynchronises, the CRC check will reject the payload.
                if byte == FRAME_END {
                    self.state = RxState::Listening;
                    return Feed::Complete(&self.buf);
                }
                self.state = RxState::Receiving;
                self.store(unescape(byte))
            }
            RxState::Discarding => {
                if byte == FRAME_END {
                    self.state = RxState::Listening;
                    self.buf.clear();
                    Feed::Dropped
                } else {
                    Feed::Pending
                }
            }
        }
    }

    fn store(&mut self, byte: u8) -> Feed<'_> {
        if self.buf.push(byte).is_err() {
            self.state = RxState::Discarding;
            return Feed::Overflow;
        }
        Feed::Pending
    }
}
