//! Outbound message builder and echo-verified transmitter.
//!
//! [`TxEngine`] builds one message at a time (header, command blocks, CRC) and
//! then puts it on the bus with [`TxEngine::transmit_now`]. On a half-duplex bus
//! every node hears its own transmission, so success is judged by comparing
//! that reflection with what was sent:
//!
//! 1. Wait until the receive side reports the bus quiet
//! 2. Arm the echo check, assert the direction-enable pin, write the escaped
//!    frame, flush, release the pin
//! 3. Wait for the echo: a match is success, a different frame is a collision,
//!    silence is a timeout
//! 4. Back off for a random time and retry, up to [`MAX_TX_ATTEMPTS`]
//!
//! The sequence id advances exactly once per message, whether the message was
//! delivered or abandoned.
//!
//! ## Notes
//!
//! - `transmit_now()` busy-waits. The receive and timer interrupts must keep
//!   running while it spins, because they are what observe the echo.
//! - Only one message exists at a time. Calling [`start`](TxEngine::start)
//!   again discards whatever was being built.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal_nb::serial;
use heapless::Vec;
use nb::block;
use rand_core::RngCore;

use crate::consts::{HEADER_LEN, MASTER_ADDRESS, MAX_MESSAGE_LEN, MAX_TX_ATTEMPTS};
use crate::crc::crc8_update;
use crate::encoding::FrameEncoder;
use crate::error::TxError;
use crate::link::{EchoStatus, SharedLink, with_link};
use crate::message::Header;

/// Transmit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    /// No message in progress.
    #[default]
    Idle,
    /// A message is being assembled with [`TxEngine::append`].
    MessageBuilding,
    /// The message is on the wire and its echo is awaited.
    EchoVerifying,
}

/// Tuning parameters for the transmit loop, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTiming {
    /// Longest wait for the bus to go quiet before an attempt counts as failed.
    pub quiet_timeout_ms: u32,
    /// Longest wait for the echo after the frame was flushed.
    pub echo_timeout_ms: u32,
    /// Upper bound of the random pause between attempts.
    pub max_backoff_ms: u32,
}

impl Default for TxTiming {
    fn default() -> Self {
        Self {
            quiet_timeout_ms: 20,
            echo_timeout_ms: 10,
            max_backoff_ms: 8,
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Delivered,
    BusBusy,
    WriteFailed,
    Collision,
    NoEcho,
}

/// The one outbound message session of a node.
pub struct TxEngine<'a, SER, DE>
where
    SER: serial::Write<u8>,
    DE: OutputPin,
{
    link: &'a SharedLink,
    serial: SER,
    de: DE,
    de_inverted: bool,
    timing: TxTiming,
    state: TxState,
    buf: Vec<u8, MAX_MESSAGE_LEN>,
    crc: u8,
    src: u8,
    dst: u8,
    attempts: u8,
    /// Messages delivered and echo-verified.
    pub tx_good: u16,
    /// Messages abandoned after exhausting retries.
    pub tx_abandoned: u16,
}

impl<SER, DE> core::fmt::Debug for TxEngine<'_, SER, DE>
where
    SER: serial::Write<u8>,
    DE: OutputPin,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TxEngine")
            .field("state", &self.state)
            .field("timing", &self.timing)
            .field("buffered", &self.buf.len())
            .field("attempts", &self.attempts)
            .field("tx_good", &self.tx_good)
            .field("tx_abandoned", &self.tx_abandoned)
            .finish()
    }
}

impl<'a, SER, DE> TxEngine<'a, SER, DE>
where
    SER: serial::Write<u8>,
    DE: OutputPin,
{
    /// Creates an idle engine.
    ///
    /// # Arguments
    /// - `link`: the interrupt-side state that observes the echo
    /// - `serial`: byte transport to the bus transceiver
    /// - `de`: the transceiver's direction-enable pin, released immediately
    /// - `de_inverted`: whether the pin is active-low
    /// - `timing`: transmit loop tuning
    pub fn new(
        link: &'a SharedLink,
        serial: SER,
        de: DE,
        de_inverted: Option<bool>,
        timing: TxTiming,
    ) -> Self {
        let mut engine = Self {
            link,
            serial,
            de,
            de_inverted: de_inverted.unwrap_or(false),
            timing,
            state: TxState::Idle,
            buf: Vec::new(),
            crc: 0,
            src: MASTER_ADDRESS,
            dst: MASTER_ADDRESS,
            attempts: 0,
            tx_good: 0,
            tx_abandoned: 0,
        };
        engine.write_de(false);
        engine
    }

    fn write_de(&mut self, enable: bool) {
        let level = if self.de_inverted { !enable } else { enable };
        let _ = if level {
            self.de.set_high()
        } else {
            self.de.set_low()
        };
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Attempts used by the last [`transmit_now`](Self::transmit_now).
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Command-block bytes buffered so far.
    pub fn body_len(&self) -> usize {
        self.buf.len().saturating_sub(HEADER_LEN)
    }

    /// `true` if a message with at least one command block is waiting to be sent.
    pub fn has_pending(&self) -> bool {
        self.state == TxState::MessageBuilding && self.body_len() > 0
    }

    /// Bytes still free for command blocks in the message being built.
    ///
    /// A block up to this size is appended without flushing.
    pub fn room(&self) -> usize {
        if self.state != TxState::MessageBuilding {
            return 0;
        }
        // one byte stays free for the CRC trailer
        (MAX_MESSAGE_LEN - 1).saturating_sub(self.buf.len())
    }

    /// Begins a new message from `src` to the coordinator.
    pub fn start(&mut self, src: u8) {
        self.start_to(src, MASTER_ADDRESS);
    }

    /// Begins a new message from `src` to `dst`, discarding anything in progress.
    ///
    /// The header is stamped with the link's current sequence id.
    pub fn start_to(&mut self, src: u8, dst: u8) {
        let seq = with_link(self.link, |link| link.seq());
        let header = Header::new(seq, src, dst);
        self.buf.clear();
        self.crc = 0;
        for b in header.to_bytes() {
            self.push(b);
        }
        self.src = src;
        self.dst = dst;
        self.state = TxState::MessageBuilding;
    }

    fn push(&mut self, byte: u8) {
        self.crc = crc8_update(self.crc, byte);
        // callers check capacity first
        let _ = self.buf.push(byte);
    }

    /// Appends one command block `[opcode][head][data]`.
    ///
    /// When the block does not fit, the buffered message is transmitted first and
    /// a new one is started, so a long response may span several frames.
    ///
    /// # Returns
    /// The number of bytes added.
    ///
    /// # Errors
    /// - [`TxError::NotBuilding`] without a preceding [`start`](Self::start)
    /// - [`TxError::BlockTooLarge`] if the block cannot fit even an empty message
    /// - [`TxError::Abandoned`] if flushing the full message failed
    pub fn append<D: DelayNs, R: RngCore>(
        &mut self,
        opcode: u8,
        head: Option<u8>,
        data: &[u8],
        delay: &mut D,
        rng: &mut R,
    ) -> Result<usize, TxError> {
        if self.state != TxState::MessageBuilding {
            return Err(TxError::NotBuilding);
        }
        let block_len = 1 + usize::from(head.is_some()) + data.len();
        // room for the CRC trailer is kept free
        let capacity = MAX_MESSAGE_LEN - 1;
        if HEADER_LEN + block_len > capacity {
            return Err(TxError::BlockTooLarge(block_len));
        }
        if self.buf.len() + block_len > capacity {
            let (src, dst) = (self.src, self.dst);
            if !self.transmit_now(delay, rng) {
                return Err(TxError::Abandoned);
            }
            self.start_to(src, dst);
        }
        self.push(opcode);
        if let Some(h) = head {
            self.push(h);
        }
        for &b in data {
            self.push(b);
        }
        Ok(block_len)
    }

    /// Abandons the message being built without sending it.
    pub fn discard(&mut self) {
        if self.state == TxState::MessageBuilding {
            self.buf.clear();
            self.state = TxState::Idle;
        }
    }

    /// Sends the buffered message, retrying on collision or missing echo.
    ///
    /// Returns `true` immediately if nothing is buffered.
    ///
    /// # Returns
    /// `true` if the echo of the message was verified, `false` once all
    /// [`MAX_TX_ATTEMPTS`] failed. Either way the sequence id has advanced by
    /// exactly one and the engine is [`TxState::Idle`].
    pub fn transmit_now<D: DelayNs, R: RngCore>(&mut self, delay: &mut D, rng: &mut R) -> bool {
        if !self.has_pending() {
            self.discard();
            return true;
        }
        // CRC trailer, checked for room in append()
        let crc = self.crc;
        let _ = self.buf.push(crc);

        for attempt in 1..=MAX_TX_ATTEMPTS {
            self.attempts = attempt;
            match self.attempt(delay) {
                Attempt::Delivered => {
                    with_link(self.link, |link| link.disarm_echo());
                    self.buf.clear();
                    self.state = TxState::Idle;
                    self.tx_good = self.tx_good.wrapping_add(1);
                    bus_trace!("sent after {} attempts", attempt);
                    return true;
                }
                Attempt::BusBusy => bus_warn!("bus busy, attempt {}", attempt),
                Attempt::WriteFailed => bus_warn!("serial write failed, attempt {}", attempt),
                Attempt::Collision => bus_warn!("echo mismatch (collision), attempt {}", attempt),
                Attempt::NoEcho => bus_warn!("echo timeout, attempt {}", attempt),
            }
            with_link(self.link, |link| link.disarm_echo());
            self.state = TxState::MessageBuilding;
            if attempt < MAX_TX_ATTEMPTS && self.timing.max_backoff_ms > 0 {
                delay.delay_ms(rng.next_u32() % self.timing.max_backoff_ms.saturating_add(1));
            }
        }

        with_link(self.link, |link| link.abandon());
        self.buf.clear();
        self.state = TxState::Idle;
        self.tx_abandoned = self.tx_abandoned.wrapping_add(1);
        bus_error!("message abandoned after {} attempts", MAX_TX_ATTEMPTS);
        false
    }

    fn attempt<D: DelayNs>(&mut self, delay: &mut D) -> Attempt {
        let link = self.link;
        if !wait_until(delay, self.timing.quiet_timeout_ms, || {
            with_link(link, |l| l.is_listening())
        }) {
            return Attempt::BusBusy;
        }

        // armed before the first byte: the reflection arrives while still sending
        with_link(link, |l| l.arm_echo(&self.buf));
        self.state = TxState::EchoVerifying;

        self.write_de(true);
        let written = write_frame(&mut self.serial, &self.buf);
        self.write_de(false);
        if written.is_err() {
            return Attempt::WriteFailed;
        }

        let mut outcome = EchoStatus::Verifying;
        let _ = wait_until(delay, self.timing.echo_timeout_ms, || {
            outcome = with_link(link, |l| l.echo_status());
            outcome != EchoStatus::Verifying
        });
        match outcome {
            EchoStatus::Matched => Attempt::Delivered,
            EchoStatus::Collided => Attempt::Collision,
            EchoStatus::Verifying | EchoStatus::Idle => Attempt::NoEcho,
        }
    }
}

fn write_frame<S: serial::Write<u8>>(serial: &mut S, payload: &[u8]) -> Result<(), S::Error> {
    for byte in FrameEncoder::new(payload) {
        block!(serial.write(byte))?;
    }
    block!(serial.flush())
}

/// Spins until `done` holds, checking once per millisecond for at most `timeout_ms`.
fn wait_until<D: DelayNs>(delay: &mut D, timeout_ms: u32, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..timeout_ms {
        if done() {
            return true;
        }
        delay.delay_ms(1);
    }
    done()
}
