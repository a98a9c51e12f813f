//! State shared between the interrupt context and the main loop.
//!
//! [`BusLink`] is everything the receive interrupt and the millisecond timer
//! interrupt touch: the [`RxAssembler`], the single-slot inbox of complete
//! frames, the console byte queue, the echo comparison for the frame currently
//! being transmitted, the outbound sequence id and the bus-silence watchdog.
//!
//! It is meant to live in a [`SharedLink`], a `critical_section` mutex, so
//! that the main loop can inspect and update it while interrupts are masked.
//! Every method is O(1) or bounded by [`MAX_MESSAGE_LEN`], and nothing here
//! blocks.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::{Vec, spsc::Queue};

use crate::consts::{CONSOLE_QUEUE_LEN, MAX_MESSAGE_LEN};
use crate::rx::{Feed, RxAssembler};

/// An unescaped frame payload as it came off the bus.
pub type Frame = Vec<u8, MAX_MESSAGE_LEN>;

/// A [`BusLink`] guarded for access from both interrupt and main-loop context.
pub type SharedLink = Mutex<RefCell<BusLink>>;

/// Runs `f` on the link inside a critical section.
pub fn with_link<T>(link: &SharedLink, f: impl FnOnce(&mut BusLink) -> T) -> T {
    critical_section::with(|cs| f(&mut link.borrow_ref_mut(cs)))
}

/// Progress of the echo check for the frame currently on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoStatus {
    /// Nothing is being verified.
    #[default]
    Idle,
    /// Waiting for our own frame to come back.
    Verifying,
    /// The reflected frame matched what was sent.
    Matched,
    /// A frame ended on the bus that did not match what was sent.
    Collided,
}

/// Counters kept by the interrupt side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames that reached their end delimiter.
    pub rx_frames: u16,
    /// Frames that overflowed the receive buffer.
    pub rx_overflows: u16,
    /// Complete frames dropped because the inbox was still occupied.
    pub rx_dropped: u16,
    /// Bytes dropped because the console queue was full.
    pub console_dropped: u16,
    /// Echo checks that matched.
    pub echo_matched: u16,
    /// Echo checks that saw a different frame.
    pub echo_collisions: u16,
    /// Frames abandoned by the bus-silence watchdog.
    pub watchdog_resets: u16,
}

/// Interrupt-side bus state.
pub struct BusLink {
    rx: RxAssembler,
    // capacity is N - 1: at most one unconsumed message
    inbox: Queue<Frame, 2>,
    console: Queue<u8, { CONSOLE_QUEUE_LEN + 1 }>,
    echo: EchoStatus,
    echo_expected: Frame,
    seq: u8,
    now_ms: u32,
    quiet_ms: u32,
    quiet_limit_ms: u32,
    stats: LinkStats,
}

impl core::fmt::Debug for BusLink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BusLink")
            .field("rx", &self.rx.state())
            .field("inbox", &self.inbox.len())
            .field("echo", &self.echo)
            .field("seq", &self.seq)
            .field("now_ms", &self.now_ms)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BusLink {
    /// Creates an idle link.
    ///
    /// # Arguments
    /// - `quiet_limit_ms`: how long a frame may stall before the watchdog abandons it
    pub const fn new(quiet_limit_ms: u32) -> Self {
        Self {
            rx: RxAssembler::new(),
            inbox: Queue::new(),
            console: Queue::new(),
            echo: EchoStatus::Idle,
            echo_expected: Vec::new(),
            seq: 0,
            now_ms: 0,
            quiet_ms: 0,
            quiet_limit_ms,
            stats: LinkStats {
                rx_frames: 0,
                rx_overflows: 0,
                rx_dropped: 0,
                console_dropped: 0,
                echo_matched: 0,
                echo_collisions: 0,
                watchdog_resets: 0,
            },
        }
    }

    /// Handles one byte from the bus. Call from the serial receive interrupt.
    pub fn on_byte(&mut self, byte: u8) {
        self.quiet_ms = 0;
        match self.rx.feed(byte) {
            Feed::Pending => {}
            Feed::Console(b) => {
                if self.console.enqueue(b).is_err() {
                    self.stats.console_dropped = self.stats.console_dropped.wrapping_add(1);
                }
            }
            Feed::Overflow => {
                self.stats.rx_overflows = self.stats.rx_overflows.wrapping_add(1);
            }
            Feed::Dropped => {}
            Feed::Complete(payload) => {
                self.stats.rx_frames = self.stats.rx_frames.wrapping_add(1);
                if self.echo == EchoStatus::Verifying {
                    if payload == &self.echo_expected[..] {
                        self.echo = EchoStatus::Matched;
                        self.seq = self.seq.wrapping_add(1);
                        self.stats.echo_matched = self.stats.echo_matched.wrapping_add(1);
                    } else {
                        self.echo = EchoStatus::Collided;
                        self.stats.echo_collisions = self.stats.echo_collisions.wrapping_add(1);
                    }
                    return;
                }
                let queued = match Frame::from_slice(payload) {
                    Ok(frame) => self.inbox.enqueue(frame).is_ok(),
                    Err(()) => false,
                };
                if !queued {
                    self.stats.rx_dropped = self.stats.rx_dropped.wrapping_add(1);
                }
            }
        }
    }

    /// Advances the millisecond clock and runs the bus-silence watchdog.
    /// Call from a 1 ms periodic timer interrupt.
    pub fn tick(&mut self) {
        self.now_ms = self.now_ms.wrapping_add(1);
        self.quiet_ms = self.quiet_ms.saturating_add(1);
        if !self.rx.is_listening() && self.quiet_ms >= self.quiet_limit_ms {
            self.rx.reset();
            self.stats.watchdog_resets = self.stats.watchdog_resets.wrapping_add(1);
        }
    }

    /// `true` when no frame is in progress on the bus.
    pub fn is_listening(&self) -> bool {
        self.rx.is_listening()
    }

    /// Milliseconds since start-up, wrapping.
    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    /// Sequence id the next outbound message will carry.
    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Starts verifying that the next frame on the bus equals `sent`.
    pub fn arm_echo(&mut self, sent: &[u8]) {
        self.echo_expected.clear();
        // sent is an unescaped message, never longer than MAX_MESSAGE_LEN
        let _ = self.echo_expected.extend_from_slice(sent);
        self.echo = EchoStatus::Verifying;
    }

    /// Current echo status.
    pub fn echo_status(&self) -> EchoStatus {
        self.echo
    }

    /// Stops any echo check without touching the sequence id.
    pub fn disarm_echo(&mut self) {
        self.echo = EchoStatus::Idle;
    }

    /// Gives up on the current message: stops the echo check and advances the
    /// sequence id so receivers can see the gap.
    pub fn abandon(&mut self) {
        self.echo = EchoStatus::Idle;
        self.seq = self.seq.wrapping_add(1);
    }

    /// `true` if a complete frame is waiting to be consumed.
    pub fn has_frame(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Takes the unconsumed frame, if any.
    pub fn take_frame(&mut self) -> Option<Frame> {
        self.inbox.dequeue()
    }

    /// Takes one byte destined for the console.
    pub fn take_console_byte(&mut self) -> Option<u8> {
        self.console.dequeue()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}
