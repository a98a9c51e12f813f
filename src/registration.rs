//! Roll-call registration state machine.
//!
//! A node moves through a strictly ordered lifecycle:
//!
//! ```text
//! Uninitialized -> Unregistered -> RollCallPending -> WaitingForAssignment -> Idle
//! ```
//!
//! The coordinator broadcasts a roll call. Every node waits a delay derived from
//! its own address, so responses are spread out in time, then answers. The
//! coordinator later gives each responder a bitmask index for group addressing.
//!
//! This type only holds state and timing; sending the response and reacting to
//! overheard collisions is done by [`crate::node::BusNode`].

use crate::consts::{BITMASK_INDEX_MAX, NO_BITMASK_INDEX};
use crate::error::RegistrationError;

/// Registration lifecycle, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RegistrationState {
    /// Before start-up has settled on an address.
    #[default]
    Uninitialized = 0,
    /// Has an address, has not answered a roll call.
    Unregistered = 1,
    /// Heard a roll call, waiting for its response slot.
    RollCallPending = 2,
    /// Answered a roll call, waiting for a bitmask index.
    WaitingForAssignment = 3,
    /// Fully registered.
    Idle = 4,
}

/// Registration state, bitmask index and the roll-call response stopwatch.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    state: RegistrationState,
    index: Option<u8>,
    respond_at: Option<u32>,
    /// When the last roll call was heard, and its slot width.
    roll_call: (u32, u32),
}

impl Registration {
    /// A fresh, uninitialized registration.
    pub const fn new() -> Self {
        Self {
            state: RegistrationState::Uninitialized,
            index: None,
            respond_at: None,
            roll_call: (0, 0),
        }
    }

    /// Current state.
    pub fn state(&self) -> RegistrationState {
        self.state
    }

    /// Assigned bitmask index, if any.
    pub fn index(&self) -> Option<u8> {
        self.index
    }

    /// Bitmask index as reported on the wire, [`NO_BITMASK_INDEX`] when unassigned.
    pub fn index_byte(&self) -> u8 {
        self.index.unwrap_or(NO_BITMASK_INDEX)
    }

    /// Start-up finished and an address is in place.
    pub fn begin(&mut self) {
        if self.state == RegistrationState::Uninitialized {
            self.state = RegistrationState::Unregistered;
        }
    }

    /// Response delay for a node at `address`: `(address + 1) * slot_ms`.
    pub const fn response_delay(address: u8, slot_ms: u32) -> u32 {
        (address as u32 + 1).saturating_mul(slot_ms)
    }

    /// Handles a roll-call broadcast heard at `now_ms`.
    ///
    /// Arms the response stopwatch and clears any previous bitmask index.
    /// Ignored before [`begin`](Self::begin).
    pub fn on_roll_call(&mut self, address: u8, now_ms: u32, slot_ms: u32) {
        if self.state == RegistrationState::Uninitialized {
            return;
        }
        self.index = None;
        self.roll_call = (now_ms, slot_ms);
        self.respond_at = Some(now_ms.wrapping_add(Self::response_delay(address, slot_ms)));
        self.state = RegistrationState::RollCallPending;
    }

    /// `true` once the roll-call response stopwatch has elapsed.
    pub fn response_due(&self, now_ms: u32) -> bool {
        match (self.state, self.respond_at) {
            (RegistrationState::RollCallPending, Some(at)) => deadline_passed(now_ms, at),
            _ => false,
        }
    }

    /// The roll-call response has been sent (or abandoned).
    pub fn responded(&mut self) {
        self.respond_at = None;
        if self.state == RegistrationState::RollCallPending {
            self.state = RegistrationState::WaitingForAssignment;
        }
    }

    /// Another node answered the roll call with this node's address, and this
    /// node has moved to `address`.
    ///
    /// A pending response is rescheduled to the slot of the new address,
    /// counted from the same roll call. If the coordinator may already have
    /// heard the ambiguous one, the node waits for the next roll call instead.
    pub fn on_self_collision(&mut self, address: u8) {
        if self.state == RegistrationState::RollCallPending {
            let (heard_at, slot_ms) = self.roll_call;
            self.respond_at = Some(heard_at.wrapping_add(Self::response_delay(address, slot_ms)));
        } else if self.state >= RegistrationState::WaitingForAssignment {
            self.state = RegistrationState::Unregistered;
            self.index = None;
            self.respond_at = None;
        }
    }

    /// Stores a bitmask index assigned by the coordinator.
    ///
    /// # Errors
    /// - [`RegistrationError::WrongState`] before the node answered a roll call
    /// - [`RegistrationError::IndexOutOfRange`] for an index above [`BITMASK_INDEX_MAX`]
    pub fn assign_index(&mut self, index: u8) -> Result<(), RegistrationError> {
        if self.state < RegistrationState::WaitingForAssignment {
            return Err(RegistrationError::WrongState);
        }
        if index > BITMASK_INDEX_MAX {
            return Err(RegistrationError::IndexOutOfRange(index));
        }
        self.index = Some(index);
        self.state = RegistrationState::Idle;
        Ok(())
    }

    /// `true` if a group broadcast carrying `mask` selects this node.
    pub fn accepts_mask(&self, mask: u32) -> bool {
        match (self.state, self.index) {
            (RegistrationState::Idle, Some(index)) => mask & (1u32 << index) != 0,
            _ => false,
        }
    }
}

/// Wrapping-safe "has `deadline` been reached at `now`".
pub(crate) fn deadline_passed(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < u32::MAX / 2
}
