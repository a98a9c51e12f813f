//! Node address selection.
//!
//! Nodes do not come with a provisioned address. Each one draws a random
//! address from the node pool, and keeps a small blacklist of addresses it
//! has overheard other nodes using during a roll call.

use heapless::Deque;
use rand_core::RngCore;

use crate::consts::{
    BLACKLIST_LEN, BROADCAST_ADDRESS, MASTER_ADDRESS, NODE_ADDRESS_MAX, NODE_ADDRESS_MIN,
};
use crate::error::AddressError;

const POOL_SIZE: u32 = (NODE_ADDRESS_MAX - NODE_ADDRESS_MIN) as u32 + 1;

/// Bounded FIFO set of addresses known to be in use by other nodes.
///
/// When full, inserting evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct Blacklist {
    entries: Deque<u8, BLACKLIST_LEN>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new()
    }
}

impl Blacklist {
    /// An empty blacklist.
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
        }
    }

    /// `true` if `addr` has been overheard in use.
    pub fn contains(&self, addr: u8) -> bool {
        self.entries.iter().any(|&a| a == addr)
    }

    /// Records `addr`, evicting the oldest entry if at capacity. No-op if already present.
    pub fn insert(&mut self, addr: u8) {
        if self.contains(addr) {
            return;
        }
        if self.entries.is_full() {
            let _ = self.entries.pop_front();
        }
        // room was made above
        let _ = self.entries.push_back(addr);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing has been blacklisted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &u8> {
        self.entries.iter()
    }
}

/// Owns this node's address, its blacklist and the random source used to draw addresses.
#[derive(Debug)]
pub struct AddressManager<R: RngCore> {
    rng: R,
    address: u8,
    blacklist: Blacklist,
    last_draws: u16,
}

impl<R: RngCore> AddressManager<R> {
    /// Creates a manager. The node has no usable address until one is set or drawn.
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            address: BROADCAST_ADDRESS,
            blacklist: Blacklist::new(),
            last_draws: 0,
        }
    }

    /// `false` for the coordinator address, the broadcast address, or a blacklisted one.
    pub fn verify_addr(&self, addr: u8) -> bool {
        addr != MASTER_ADDRESS && addr != BROADCAST_ADDRESS && !self.blacklist.contains(addr)
    }

    /// Draws random addresses until one passes [`verify_addr`](Self::verify_addr),
    /// and adopts it.
    pub fn new_address(&mut self) -> u8 {
        let mut draws: u16 = 0;
        loop {
            draws = draws.saturating_add(1);
            let candidate = NODE_ADDRESS_MIN + (self.rng.next_u32() % POOL_SIZE) as u8;
            if self.verify_addr(candidate) {
                self.address = candidate;
                self.last_draws = draws;
                bus_debug!("drew address {} after {} tries", candidate, draws);
                return candidate;
            }
        }
    }

    /// Current address.
    pub fn addr_get(&self) -> u8 {
        self.address
    }

    /// Adopts `addr` if it passes [`verify_addr`](Self::verify_addr).
    pub fn addr_set(&mut self, addr: u8) -> Result<(), AddressError> {
        if addr == MASTER_ADDRESS || addr == BROADCAST_ADDRESS {
            return Err(AddressError::Reserved(addr));
        }
        if self.blacklist.contains(addr) {
            return Err(AddressError::Blacklisted(addr));
        }
        self.address = addr;
        Ok(())
    }

    /// Records an address overheard in use by another node.
    pub fn blacklist_add(&mut self, addr: u8) {
        self.blacklist.insert(addr);
    }

    /// The blacklist.
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// How many draws the last [`new_address`](Self::new_address) needed.
    pub fn last_draws(&self) -> u16 {
        self.last_draws
    }

    /// The random source, shared with the transmit backoff.
    pub fn rng(&mut self) -> &mut R {
        &mut self.rng
    }
}
