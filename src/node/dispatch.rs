//! Routing of received messages and execution of command blocks.
//!
//! A message is acted on when it is
//! - a roll-call broadcast from the coordinator, in any state past start-up
//! - another node's roll-call response, which is only ever overheard
//! - addressed to this node, once it has answered a roll call
//! - a mask broadcast whose mask selects this node's bitmask index
//!
//! Direct commands are answered at once. Group commands are answered after a
//! delay derived from the bitmask index so selected nodes take turns. A group
//! response never leaves before its slot: blocks whose replies do not fit the
//! held frame wait and are run once that frame has gone out.

use heapless::Vec;

use crate::consts::{BROADCAST_ADDRESS, MASTER_ADDRESS, opcode, status};
use crate::error::{AddressError, RegistrationError};
use crate::message::Message;
use crate::registration::RegistrationState;

use super::{Board, BusNode, NodeCfg};

/// Opcode plus the little-endian mask.
const GROUP_SELECT_LEN: usize = 5;

/// An ERROR block: opcode, status and three data bytes.
const ERROR_BLOCK_LEN: usize = 5;

/// Payload length of a request block, `None` for opcodes a node does not accept.
pub const fn request_len(op: u8) -> Option<usize> {
    match op {
        opcode::ROLL_CALL | opcode::PING | opcode::GET_STATUS | opcode::GET_BUTTONS => Some(0),
        opcode::ASSIGN_INDEX | opcode::SET_ADDRESS => Some(1),
        opcode::SET_LED => Some(2),
        opcode::GROUP_SELECT => Some(4),
        _ => None,
    }
}

/// Size of the response block produced for `op` when `available` payload
/// bytes follow it.
fn reply_len(op: u8, available: usize) -> usize {
    match request_len(op) {
        Some(expected) if available >= expected => {
            2 + match op {
                opcode::GET_STATUS => 4,
                opcode::GET_BUTTONS | opcode::SET_ADDRESS | opcode::ASSIGN_INDEX => 1,
                _ => 0,
            }
        }
        _ => ERROR_BLOCK_LEN,
    }
}

/// Mask of a mask broadcast, if `body` starts with one.
fn group_mask(body: &[u8]) -> Option<u32> {
    match body {
        [opcode::GROUP_SELECT, a, b, c, d, ..] => Some(u32::from_le_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    RollCall,
    Overheard(u8),
    Direct,
    Group,
    Ignore,
}

impl<C: NodeCfg> BusNode<'_, C> {
    fn route(&self, msg: &Message) -> Route {
        let h = msg.header;
        let first = msg.first_opcode();
        if h.src == MASTER_ADDRESS && h.dst == BROADCAST_ADDRESS && first == Some(opcode::ROLL_CALL) {
            return Route::RollCall;
        }
        if h.src != MASTER_ADDRESS {
            return match first {
                Some(opcode::ROLL_CALL_RESPONSE) => Route::Overheard(h.src),
                _ => Route::Ignore,
            };
        }
        let state = self.reg.state();
        if h.dst == self.addr.addr_get() && state >= RegistrationState::WaitingForAssignment {
            return Route::Direct;
        }
        if h.dst == BROADCAST_ADDRESS && state == RegistrationState::Idle {
            if let Some(mask) = group_mask(&msg.body) {
                if self.reg.accepts_mask(mask) {
                    return Route::Group;
                }
            }
        }
        Route::Ignore
    }

    pub(super) fn dispatch(&mut self, msg: &Message) {
        match self.route(msg) {
            Route::RollCall => {
                // a new roll call supersedes any held group response
                self.tx.discard();
                self.group_flush_at = None;
                self.group_rest.clear();
                let now = self.now_ms();
                self.reg
                    .on_roll_call(self.addr.addr_get(), now, C::ROLL_CALL_SLOT_MS);
            }
            Route::Overheard(src) => self.on_overheard_response(src),
            Route::Direct => {
                self.run_blocks(&msg.body, true);
                if !self.response_send() {
                    bus_warn!("response to seq {} abandoned", msg.header.seq);
                }
            }
            Route::Group => {
                self.run_blocks(&msg.body[GROUP_SELECT_LEN..], false);
                if self.tx.has_pending() {
                    let slot = u32::from(self.reg.index_byte()) + 1;
                    let at = self
                        .now_ms()
                        .wrapping_add(slot.saturating_mul(C::GROUP_SLOT_MS));
                    self.group_flush_at = Some(at);
                }
            }
            Route::Ignore => {}
        }
    }

    fn on_overheard_response(&mut self, src: u8) {
        self.addr.blacklist_add(src);
        if src != self.addr.addr_get() {
            return;
        }
        let fresh = self.addr.new_address();
        self.board.store_address(fresh);
        self.reg.on_self_collision(fresh);
        bus_warn!("address {} answered by another node, moved to {}", src, fresh);
    }

    /// Sends the held group response, then runs and sends any blocks that
    /// were waiting for room, one frame at a time.
    pub(super) fn flush_group_response(&mut self) {
        self.group_flush_at = None;
        loop {
            if !self.tx.transmit_now(&mut self.delay, self.addr.rng()) {
                bus_warn!("group response abandoned");
                self.group_rest.clear();
                return;
            }
            if self.group_rest.is_empty() {
                return;
            }
            let rest = core::mem::take(&mut self.group_rest);
            self.run_blocks(&rest, false);
        }
    }

    /// Executes every block in `body`, buffering one response per block.
    ///
    /// Parsing stops at the first unknown opcode or short payload. In a group
    /// response the buffered frame is never flushed early: once the next reply
    /// would not fit, the remaining blocks are kept for
    /// [`flush_group_response`](Self::flush_group_response).
    fn run_blocks(&mut self, body: &[u8], direct: bool) {
        self.tx.start(self.addr.addr_get());
        self.group_flush_at = None;
        self.group_rest.clear();
        let mut rest = body;
        while let Some((&op, tail)) = rest.split_first() {
            if !direct && self.tx.room() < reply_len(op, tail.len()) {
                // rest is a suffix of a received body, so it always fits
                self.group_rest = Vec::from_slice(rest).unwrap_or_default();
                return;
            }
            let actual = tail.len() as u8;
            let Some(expected) = request_len(op) else {
                bus_warn!("unknown opcode {}", op);
                self.respond(opcode::ERROR, status::UNKNOWN_OPCODE, &[op, 0, actual]);
                return;
            };
            if tail.len() < expected {
                bus_warn!("opcode {} wants {} bytes, got {}", op, expected, actual);
                self.respond(opcode::ERROR, status::LENGTH, &[op, expected as u8, actual]);
                return;
            }
            let (payload, next) = tail.split_at(expected);
            self.execute(op, payload, direct);
            rest = next;
        }
    }

    fn execute(&mut self, op: u8, payload: &[u8], direct: bool) {
        match (op, payload) {
            (opcode::PING, _) => self.respond(op, status::OK, &[]),
            (opcode::GET_STATUS, _) => {
                let data = [
                    self.reg.state() as u8,
                    self.addr.addr_get(),
                    self.reg.index_byte(),
                    self.board.buttons(),
                ];
                self.respond(op, status::OK, &data);
            }
            (opcode::GET_BUTTONS, _) => {
                let buttons = self.board.buttons();
                self.respond(op, status::OK, &[buttons]);
            }
            (opcode::SET_LED, &[led, brightness]) => {
                let st = if self.board.set_led(led, brightness) {
                    status::OK
                } else {
                    status::RANGE
                };
                self.respond(op, st, &[]);
            }
            // one address per node: never from a broadcast
            (opcode::SET_ADDRESS, &[addr]) if direct => {
                let st = match self.addr_set(addr) {
                    Ok(()) => status::OK,
                    Err(AddressError::Reserved(_)) => status::RANGE,
                    Err(AddressError::Blacklisted(_)) => status::REJECTED,
                };
                self.respond(op, st, &[addr]);
            }
            (opcode::ASSIGN_INDEX, &[index]) if direct => {
                let st = match self.reg.assign_index(index) {
                    Ok(()) => status::OK,
                    Err(RegistrationError::IndexOutOfRange(_)) => status::RANGE,
                    Err(RegistrationError::WrongState) => status::STATE,
                };
                self.respond(op, st, &[index]);
            }
            _ => self.respond(op, status::STATE, &[]),
        }
    }

    fn respond(&mut self, op: u8, st: u8, data: &[u8]) {
        if self.response_append(op, st, data, false).is_err() {
            bus_warn!("response to opcode {} dropped", op);
        }
    }
}
