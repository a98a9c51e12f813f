//! Test doubles: a shared bus wire, a delay that drives the link's timer, a
//! scripted random source and a fake board.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial;
use rand_core::{RngCore, impls};

use crate::consts::{BROADCAST_ADDRESS, FRAME_END, FRAME_START, MASTER_ADDRESS, opcode};
use crate::encoding::FrameEncoder;
use crate::link::{BusLink, SharedLink, with_link};
use crate::message::{Header, Message};
use crate::node::{Board, BusNode, NodeCfg};
use crate::registration::{Registration, RegistrationState};

pub(crate) fn leak_link_with(quiet_limit_ms: u32) -> &'static SharedLink {
    Box::leak(Box::new(Mutex::new(RefCell::new(BusLink::new(quiet_limit_ms)))))
}

pub(crate) fn leak_link() -> &'static SharedLink {
    leak_link_with(5)
}

/// Feeds `msg` into `link` as if it came over the bus.
pub(crate) fn inject(link: &SharedLink, msg: &Message) {
    for b in FrameEncoder::new(&msg.to_bytes()) {
        with_link(link, |l| l.on_byte(b));
    }
}

/// A message from the coordinator.
pub(crate) fn master_msg(dst: u8, body: &[u8]) -> Message {
    Message::new(Header::new(0, MASTER_ADDRESS, dst), body).unwrap()
}

/// The message `observer` picked up from the bus, if any.
pub(crate) fn heard(observer: &SharedLink) -> Option<Message> {
    let frame = with_link(observer, |l| l.take_frame())?;
    Some(Message::parse(&frame).unwrap())
}

/// Advances `link`'s clock as the timer interrupt would.
pub(crate) fn advance(link: &SharedLink, ms: u32) {
    for _ in 0..ms {
        with_link(link, |l| l.tick());
    }
}

/// A serial port on a shared bus. Every written byte reaches every attached
/// link, the sender's own link included, which is how the echo appears.
pub(crate) struct Wire {
    peers: Vec<&'static SharedLink>,
    frames: Vec<Vec<u8>>,
    current: Vec<u8>,
    corrupt_frames: usize,
}

impl Wire {
    /// Nothing is ever heard back.
    pub(crate) fn silent() -> Self {
        Self::loopback(&[])
    }

    pub(crate) fn loopback(peers: &[&'static SharedLink]) -> Self {
        Self {
            peers: peers.to_vec(),
            frames: Vec::new(),
            current: Vec::new(),
            corrupt_frames: 0,
        }
    }

    /// The first `n` frames reach the peers with their sequence byte garbled.
    pub(crate) fn corrupt_first(mut self, n: usize) -> Self {
        self.corrupt_frames = n;
        self
    }

    /// Raw frames written so far, delimiters included.
    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.clone()
    }
}

impl serial::ErrorType for Wire {
    type Error = serial::ErrorKind;
}

impl serial::Write<u8> for Wire {
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        if word == FRAME_START {
            self.current.clear();
        }
        let delivered = if self.corrupt_frames > 0 && self.current.len() == 2 {
            0x55
        } else {
            word
        };
        self.current.push(word);
        for peer in &self.peers {
            with_link(peer, |l| l.on_byte(delivered));
        }
        if word == FRAME_END {
            self.frames.push(core::mem::take(&mut self.current));
            self.corrupt_frames = self.corrupt_frames.saturating_sub(1);
        }
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// A delay whose every millisecond runs the link's timer tick.
pub(crate) struct TickingDelay {
    link: &'static SharedLink,
    pending_ns: u32,
}

impl TickingDelay {
    pub(crate) fn new(link: &'static SharedLink) -> Self {
        Self {
            link,
            pending_ns: 0,
        }
    }
}

impl DelayNs for TickingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.pending_ns = self.pending_ns.saturating_add(ns);
        while self.pending_ns >= 1_000_000 {
            self.pending_ns -= 1_000_000;
            with_link(self.link, |l| l.tick());
        }
    }

    fn delay_ms(&mut self, ms: u32) {
        advance(self.link, ms);
    }
}

/// Replays a fixed list of values, or counts up from a seed.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedRng {
    script: Vec<u32>,
    pos: usize,
    counter: u32,
}

impl ScriptedRng {
    pub(crate) fn new(script: &[u32]) -> Self {
        Self {
            script: script.to_vec(),
            pos: 0,
            counter: 0,
        }
    }

    pub(crate) fn counting(seed: u32) -> Self {
        Self {
            script: Vec::new(),
            pos: 0,
            counter: seed,
        }
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        if self.script.is_empty() {
            let v = self.counter;
            self.counter = self.counter.wrapping_add(1);
            return v;
        }
        let v = self.script[self.pos % self.script.len()];
        self.pos += 1;
        v
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// Four LEDs, a button bitmap and an address cell.
#[derive(Debug, Default)]
pub(crate) struct FakeBoard {
    pub(crate) leds: [u8; 4],
    pub(crate) buttons: u8,
    pub(crate) stored: Option<u8>,
    pub(crate) store_writes: usize,
}

impl Board for FakeBoard {
    fn set_led(&mut self, led: u8, brightness: u8) -> bool {
        match self.leds.get_mut(usize::from(led)) {
            Some(slot) => {
                *slot = brightness;
                true
            }
            None => false,
        }
    }

    fn buttons(&mut self) -> u8 {
        self.buttons
    }

    fn load_address(&mut self) -> Option<u8> {
        self.stored
    }

    fn store_address(&mut self, addr: u8) {
        self.stored = Some(addr);
        self.store_writes += 1;
    }
}

/// A direction-enable pin nobody looks at.
#[derive(Debug, Default)]
pub(crate) struct NoopPin;

impl embedded_hal::digital::ErrorType for NoopPin {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for NoopPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Only ever used as a type parameter.
#[derive(Debug)]
pub(crate) enum TestCfg {}

impl NodeCfg for TestCfg {
    type Serial = Wire;
    type DirEnable = NoopPin;
    type Delay = TickingDelay;
    type Rand = ScriptedRng;
    type Board = FakeBoard;
}

pub(crate) type TestNode = BusNode<'static, TestCfg>;

/// A node on `link` whose transmissions reach every link in `peers`.
pub(crate) fn test_node(
    link: &'static SharedLink,
    peers: &[&'static SharedLink],
    rng: ScriptedRng,
    board: FakeBoard,
) -> TestNode {
    BusNode::new(
        link,
        Wire::loopback(peers),
        NoopPin,
        None,
        TickingDelay::new(link),
        rng,
        board,
    )
}

/// A node at `addr` that went through a roll call and holds bitmask `index`,
/// plus its link and an observer link standing in for the coordinator.
pub(crate) fn registered_node(
    addr: u8,
    index: u8,
) -> (TestNode, &'static SharedLink, &'static SharedLink) {
    let link = leak_link();
    let observer = leak_link();
    let board = FakeBoard {
        stored: Some(addr),
        ..FakeBoard::default()
    };
    let mut node = test_node(link, &[link, observer], ScriptedRng::counting(0), board);
    node.begin();

    inject(link, &master_msg(BROADCAST_ADDRESS, &[opcode::ROLL_CALL]));
    node.poll();
    advance(link, Registration::response_delay(addr, TestCfg::ROLL_CALL_SLOT_MS));
    node.poll();
    assert!(heard(observer).is_some());

    inject(link, &master_msg(addr, &[opcode::ASSIGN_INDEX, index]));
    node.poll();
    assert!(heard(observer).is_some());
    assert_eq!(node.registration_state(), RegistrationState::Idle);
    (node, link, observer)
}
