//! The bus node session.
//!
//! [`BusNode`] is the single owned value a node's firmware holds: it ties the
//! interrupt-side [`BusLink`](crate::link::BusLink) to the transmitter, the
//! address manager, the registration state machine and the board. The main
//! loop calls [`BusNode::poll`] repeatedly; everything else is driven from
//! there.
//!
//! ## Example
//!
//! ```ignore
//! rollbus::init_bus_link!(BUS_LINK, <Cfg as NodeCfg>::BUS_QUIET_MS);
//!
//! let mut node = BusNode::<Cfg>::new(&BUS_LINK, uart_tx, de_pin, None, delay, rng, board);
//! node.begin();
//! loop {
//!     node.poll();
//!     while let Some(b) = node.console_byte() {
//!         console.push(b);
//!     }
//! }
//! ```

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal_nb::serial;
use heapless::Vec;
use rand_core::RngCore;

use crate::address::{AddressManager, Blacklist};
use crate::consts::{MAX_BODY_LEN, opcode, status};
use crate::error::{AddressError, RxError, TxError};
use crate::link::{LinkStats, SharedLink, with_link};
use crate::message::Message;
use crate::registration::{Registration, RegistrationState, deadline_passed};
use crate::tx::{TxEngine, TxState, TxTiming};

mod dispatch;

pub use dispatch::request_len;

/// Board-level collaborators a node drives on the coordinator's behalf.
pub trait Board {
    /// Sets LED `led` to `brightness`. Returns `false` if there is no such LED.
    fn set_led(&mut self, led: u8, brightness: u8) -> bool;

    /// Current button bitmap.
    fn buttons(&mut self) -> u8;

    /// The address persisted by a previous run, if any.
    fn load_address(&mut self) -> Option<u8>;

    /// Persists `addr` for the next run.
    fn store_address(&mut self, addr: u8);
}

/// Compile-time configuration of a node: its hardware types and bus timing.
///
/// All nodes sharing a bus must agree on the timing values, the protocol does
/// not negotiate them.
pub trait NodeCfg {
    /// Byte transport to the bus transceiver.
    type Serial: serial::Write<u8>;

    /// Transceiver direction-enable pin.
    type DirEnable: OutputPin;

    /// Busy-wait provider for the transmit loop.
    type Delay: DelayNs;

    /// Random source for address draws and retry backoff.
    type Rand: RngCore;

    /// LEDs, buttons and address storage.
    type Board: Board;

    /// Silence after which a half-received frame is abandoned. Pass this to
    /// [`init_bus_link!`](crate::init_bus_link).
    const BUS_QUIET_MS: u32 = 5;

    /// How long to wait for the echo of a transmitted frame.
    const ECHO_TIMEOUT_MS: u32 = 10;

    /// Roll-call response spacing, multiplied by `address + 1`.
    const ROLL_CALL_SLOT_MS: u32 = 2;

    /// Group response spacing, multiplied by `bitmask index + 1`.
    const GROUP_SLOT_MS: u32 = 4;

    /// Upper bound of the random pause between transmit attempts.
    const MAX_BACKOFF_MS: u32 = 8;
}

/// One node's protocol session.
pub struct BusNode<'a, C: NodeCfg> {
    link: &'a SharedLink,
    tx: TxEngine<'a, C::Serial, C::DirEnable>,
    addr: AddressManager<C::Rand>,
    reg: Registration,
    delay: C::Delay,
    board: C::Board,
    group_flush_at: Option<u32>,
    // group request blocks whose replies did not fit the held frame
    group_rest: Vec<u8, MAX_BODY_LEN>,
    /// Frames that passed length, CRC and version checks.
    pub rx_good: u16,
    /// Frames rejected by those checks.
    pub rx_bad: u16,
}

impl<C: NodeCfg> fmt::Debug for BusNode<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusNode")
            .field("address", &self.addr.addr_get())
            .field("registration", &self.reg)
            .field("tx", &self.tx.state())
            .field("group_flush_at", &self.group_flush_at)
            .field("group_rest", &self.group_rest.len())
            .field("rx_good", &self.rx_good)
            .field("rx_bad", &self.rx_bad)
            .finish()
    }
}

impl<'a, C: NodeCfg> BusNode<'a, C> {
    /// Creates a node. It has no address until [`begin`](Self::begin).
    ///
    /// # Arguments
    /// - `link`: the link fed by the receive and timer interrupts
    /// - `serial`: transmit side of the bus UART
    /// - `de`: transceiver direction-enable pin
    /// - `de_inverted`: whether `de` is active-low
    /// - `delay`, `rng`, `board`: see [`NodeCfg`]
    pub fn new(
        link: &'a SharedLink,
        serial: C::Serial,
        de: C::DirEnable,
        de_inverted: Option<bool>,
        delay: C::Delay,
        rng: C::Rand,
        board: C::Board,
    ) -> Self {
        let timing = TxTiming {
            // long enough for the watchdog to clear a stalled frame
            quiet_timeout_ms: C::BUS_QUIET_MS.saturating_mul(4),
            echo_timeout_ms: C::ECHO_TIMEOUT_MS,
            max_backoff_ms: C::MAX_BACKOFF_MS,
        };
        Self {
            link,
            tx: TxEngine::new(link, serial, de, de_inverted, timing),
            addr: AddressManager::new(rng),
            reg: Registration::new(),
            delay,
            board,
            group_flush_at: None,
            group_rest: Vec::new(),
            rx_good: 0,
            rx_bad: 0,
        }
    }

    /// Settles on an address and becomes ready for a roll call.
    ///
    /// The persisted address is reused if it is still valid, otherwise a new
    /// one is drawn and persisted.
    pub fn begin(&mut self) {
        let addr = match self.board.load_address() {
            Some(stored) if self.addr.addr_set(stored).is_ok() => stored,
            _ => {
                let fresh = self.addr.new_address();
                self.board.store_address(fresh);
                fresh
            }
        };
        self.reg.begin();
        bus_info!("node up at address {}", addr);
    }

    /// Handles every waiting message and runs the response stopwatches.
    ///
    /// Call from the main loop as often as possible.
    pub fn poll(&mut self) {
        loop {
            match self.rx_message_available() {
                Ok(Some(msg)) => self.dispatch(&msg),
                Ok(None) => break,
                Err(e) => bus_warn!("dropped frame, error {}", e.code()),
            }
        }

        let now = self.now_ms();
        if self.reg.response_due(now) {
            self.send_roll_call_response();
        }
        if let Some(at) = self.group_flush_at {
            if deadline_passed(now, at) {
                self.flush_group_response();
            }
        }
    }

    /// Takes the unconsumed message, if any, and validates it.
    ///
    /// # Errors
    /// The frame was dropped, see [`RxError`]. [`RxError::code`] gives the
    /// negative code for C-style callers.
    pub fn rx_message_available(&mut self) -> Result<Option<Message>, RxError> {
        let Some(frame) = with_link(self.link, |l| l.take_frame()) else {
            return Ok(None);
        };
        match Message::parse(&frame) {
            Ok(msg) => {
                self.rx_good = self.rx_good.wrapping_add(1);
                Ok(Some(msg))
            }
            Err(e) => {
                self.rx_bad = self.rx_bad.wrapping_add(1);
                Err(e)
            }
        }
    }

    /// Adds a response block `[opcode][status][data]` to the outbound message.
    ///
    /// A new message to the coordinator is started if `restart` is set or none
    /// is being built. A block that does not fit flushes the current message
    /// first.
    ///
    /// # Returns
    /// The number of bytes added.
    pub fn response_append(
        &mut self,
        opcode: u8,
        status: u8,
        data: &[u8],
        restart: bool,
    ) -> Result<usize, TxError> {
        if restart || self.tx.state() != TxState::MessageBuilding {
            self.tx.start(self.addr.addr_get());
        }
        self.tx
            .append(opcode, Some(status), data, &mut self.delay, self.addr.rng())
    }

    /// Sends the outbound message now. See [`TxEngine::transmit_now`].
    pub fn response_send(&mut self) -> bool {
        self.group_flush_at = None;
        self.group_rest.clear();
        self.tx.transmit_now(&mut self.delay, self.addr.rng())
    }

    /// Current address.
    pub fn addr_get(&self) -> u8 {
        self.addr.addr_get()
    }

    /// Moves to `addr` and persists it.
    pub fn addr_set(&mut self, addr: u8) -> Result<(), AddressError> {
        self.addr.addr_set(addr)?;
        self.board.store_address(addr);
        Ok(())
    }

    /// Marks `addr` as in use by another node.
    pub fn blacklist_add(&mut self, addr: u8) {
        self.addr.blacklist_add(addr);
    }

    /// See [`AddressManager::verify_addr`].
    pub fn verify_addr(&self, addr: u8) -> bool {
        self.addr.verify_addr(addr)
    }

    /// Addresses known to be taken.
    pub fn blacklist(&self) -> &Blacklist {
        self.addr.blacklist()
    }

    /// Registration state.
    pub fn registration_state(&self) -> RegistrationState {
        self.reg.state()
    }

    /// Assigned bitmask index.
    pub fn bitmask_index(&self) -> Option<u8> {
        self.reg.index()
    }

    /// Next byte seen on the bus outside any frame.
    pub fn console_byte(&mut self) -> Option<u8> {
        with_link(self.link, |l| l.take_console_byte())
    }

    /// Receive-side counters.
    pub fn link_stats(&self) -> LinkStats {
        with_link(self.link, |l| l.stats())
    }

    /// Messages delivered and echo-verified.
    pub fn tx_good(&self) -> u16 {
        self.tx.tx_good
    }

    /// Messages abandoned after exhausting retries.
    pub fn tx_abandoned(&self) -> u16 {
        self.tx.tx_abandoned
    }

    /// The board.
    pub fn board(&self) -> &C::Board {
        &self.board
    }

    /// The board, mutably.
    pub fn board_mut(&mut self) -> &mut C::Board {
        &mut self.board
    }

    fn now_ms(&self) -> u32 {
        with_link(self.link, |l| l.now_ms())
    }

    fn send_roll_call_response(&mut self) {
        let state = self.reg.state() as u8;
        let sent = self
            .response_append(opcode::ROLL_CALL_RESPONSE, status::OK, &[state], true)
            .is_ok()
            && self.response_send();
        self.reg.responded();
        if sent {
            bus_debug!("answered roll call as {}", self.addr.addr_get());
        } else {
            bus_warn!("roll call response abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{BLACKLIST_LEN, BROADCAST_ADDRESS, MASTER_ADDRESS, NODE_ADDRESS_MIN};
    use crate::message::Header;
    use crate::testutil::{
        FakeBoard, ScriptedRng, advance, heard, inject, leak_link, master_msg, test_node,
    };

    fn roll_call() -> Message {
        master_msg(BROADCAST_ADDRESS, &[opcode::ROLL_CALL])
    }

    fn roll_call_response(src: u8) -> Message {
        let header = Header::new(0, src, MASTER_ADDRESS);
        Message::new(header, &[opcode::ROLL_CALL_RESPONSE, status::OK, 2]).unwrap()
    }

    #[test]
    fn test_begin_reuses_stored_address() {
        let link = leak_link();
        let board = FakeBoard {
            stored: Some(0x33),
            ..FakeBoard::default()
        };
        let mut node = test_node(link, &[link], ScriptedRng::counting(0), board);
        assert_eq!(node.registration_state(), RegistrationState::Uninitialized);
        node.begin();
        assert_eq!(node.addr_get(), 0x33);
        assert_eq!(node.registration_state(), RegistrationState::Unregistered);
        assert_eq!(node.board().store_writes, 0);
    }

    #[test]
    fn test_begin_draws_and_persists_when_stored_address_invalid() {
        let link = leak_link();
        let board = FakeBoard {
            stored: Some(BROADCAST_ADDRESS),
            ..FakeBoard::default()
        };
        let mut node = test_node(link, &[link], ScriptedRng::new(&[6]), board);
        node.begin();
        assert_eq!(node.addr_get(), NODE_ADDRESS_MIN + 6);
        assert_eq!(node.board().stored, Some(NODE_ADDRESS_MIN + 6));
    }

    #[test]
    fn test_corrupted_crc_is_reported_not_delivered() {
        let link = leak_link();
        let mut node = test_node(link, &[link], ScriptedRng::counting(0), FakeBoard::default());
        let mut raw = master_msg(0x10, &[opcode::PING]).to_bytes();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        for b in crate::encoding::FrameEncoder::new(&raw) {
            with_link(link, |l| l.on_byte(b));
        }
        let err = node.rx_message_available().unwrap_err();
        assert_eq!(err, RxError::Crc);
        assert!(err.code() < 0);
        assert_eq!(node.rx_message_available(), Ok(None));
        assert_eq!(node.rx_bad, 1);
        assert_eq!(node.rx_good, 0);
    }

    #[test]
    fn test_roll_call_response_after_address_slot() {
        let link = leak_link();
        let observer = leak_link();
        let board = FakeBoard {
            stored: Some(0x0A),
            ..FakeBoard::default()
        };
        let mut node = test_node(link, &[link, observer], ScriptedRng::counting(0), board);
        node.begin();

        inject(link, &roll_call());
        node.poll();
        assert_eq!(node.registration_state(), RegistrationState::RollCallPending);

        // (0x0A + 1) * 2 ms
        advance(link, 21);
        node.poll();
        assert!(heard(observer).is_none());
        advance(link, 1);
        node.poll();

        let msg = heard(observer).unwrap();
        assert_eq!(msg.header.src, 0x0A);
        assert_eq!(msg.header.dst, MASTER_ADDRESS);
        assert_eq!(
            &msg.body[..],
            &[
                opcode::ROLL_CALL_RESPONSE,
                status::OK,
                RegistrationState::RollCallPending as u8
            ]
        );
        assert_eq!(node.registration_state(), RegistrationState::WaitingForAssignment);
        assert_eq!(node.tx_good(), 1);
    }

    #[test]
    fn test_roll_call_ignored_before_begin() {
        let link = leak_link();
        let mut node = test_node(link, &[link], ScriptedRng::counting(0), FakeBoard::default());
        inject(link, &roll_call());
        node.poll();
        assert_eq!(node.registration_state(), RegistrationState::Uninitialized);
    }

    #[test]
    fn test_same_address_collision_both_regenerate() {
        // both nodes draw NODE_ADDRESS_MIN + 9 first
        let link_a = leak_link();
        let link_b = leak_link();
        let mut a = test_node(link_a, &[link_a], ScriptedRng::new(&[9, 40]), FakeBoard::default());
        let mut b = test_node(link_b, &[link_b], ScriptedRng::new(&[9, 90]), FakeBoard::default());
        a.begin();
        b.begin();
        let shared = a.addr_get();
        assert_eq!(shared, b.addr_get());

        for (node, link) in [(&mut a, link_a), (&mut b, link_b)] {
            inject(link, &roll_call());
            node.poll();
            advance(link, Registration::response_delay(shared, 2));
            node.poll();
            assert_eq!(node.registration_state(), RegistrationState::WaitingForAssignment);
        }

        // each overhears the other's response carrying the shared address
        inject(link_a, &roll_call_response(shared));
        inject(link_b, &roll_call_response(shared));
        a.poll();
        b.poll();

        assert_ne!(a.addr_get(), shared);
        assert_ne!(b.addr_get(), shared);
        assert_ne!(a.addr_get(), b.addr_get());
        for node in [&a, &b] {
            assert!(node.blacklist().contains(shared));
            assert!(node.blacklist().len() <= BLACKLIST_LEN);
            assert_eq!(node.registration_state(), RegistrationState::Unregistered);
            assert_eq!(node.board().stored, Some(node.addr_get()));
        }
    }

    #[test]
    fn test_collision_while_pending_answers_with_new_address() {
        let link = leak_link();
        let observer = leak_link();
        let board = FakeBoard {
            stored: Some(0x0A),
            ..FakeBoard::default()
        };
        let mut node = test_node(link, &[link, observer], ScriptedRng::new(&[0x30]), board);
        node.begin();
        inject(link, &roll_call());
        node.poll();

        // a node with a lower response slot answers first with our address
        inject(link, &roll_call_response(0x0A));
        node.poll();
        let fresh = node.addr_get();
        assert_eq!(fresh, NODE_ADDRESS_MIN + 0x30);
        assert_eq!(node.registration_state(), RegistrationState::RollCallPending);

        // the old address's slot passes in silence
        let old_slot = Registration::response_delay(0x0A, 2);
        advance(link, old_slot);
        node.poll();
        assert!(heard(observer).is_none());
        assert_eq!(node.registration_state(), RegistrationState::RollCallPending);

        advance(link, Registration::response_delay(fresh, 2) - old_slot);
        node.poll();
        let msg = heard(observer).unwrap();
        assert_eq!(msg.header.src, fresh);
        assert_eq!(node.registration_state(), RegistrationState::WaitingForAssignment);
    }

    #[test]
    fn test_other_responses_only_blacklist() {
        let link = leak_link();
        let board = FakeBoard {
            stored: Some(0x0A),
            ..FakeBoard::default()
        };
        let mut node = test_node(link, &[link], ScriptedRng::counting(0), board);
        node.begin();
        inject(link, &roll_call_response(0x0B));
        node.poll();
        assert_eq!(node.addr_get(), 0x0A);
        assert!(node.blacklist().contains(0x0B));
        assert!(!node.verify_addr(0x0B));
    }

    #[test]
    fn test_addr_set_persists() {
        let link = leak_link();
        let mut node = test_node(link, &[link], ScriptedRng::counting(0), FakeBoard::default());
        node.blacklist_add(0x44);
        assert_eq!(node.addr_set(0x44), Err(AddressError::Blacklisted(0x44)));
        assert_eq!(node.addr_set(0x45), Ok(()));
        assert_eq!(node.board().stored, Some(0x45));
    }

    #[test]
    fn test_console_bytes_reach_main_loop() {
        let link = leak_link();
        let mut node = test_node(link, &[link], ScriptedRng::counting(0), FakeBoard::default());
        for b in b"ok" {
            with_link(link, |l| l.on_byte(*b));
        }
        node.poll();
        assert_eq!(node.console_byte(), Some(b'o'));
        assert_eq!(node.console_byte(), Some(b'k'));
        assert_eq!(node.console_byte(), None);
    }

    #[test]
    fn test_response_append_starts_session() {
        let link = leak_link();
        let observer = leak_link();
        let board = FakeBoard {
            stored: Some(0x21),
            ..FakeBoard::default()
        };
        let mut node = test_node(link, &[link, observer], ScriptedRng::counting(0), board);
        node.begin();
        assert_eq!(node.response_append(opcode::PING, status::OK, &[], false), Ok(2));
        assert_eq!(
            node.response_append(opcode::GET_BUTTONS, status::OK, &[3], false),
            Ok(3)
        );
        assert!(node.response_send());
        let msg = heard(observer).unwrap();
        assert_eq!(msg.header.src, 0x21);
        assert_eq!(
            &msg.body[..],
            &[opcode::PING, status::OK, opcode::GET_BUTTONS, status::OK, 3]
        );
    }
}
