//! # rollbus
//!
//! A portable, no_std node stack for half-duplex multi-drop serial buses (RS-485 and
//! similar), where one coordinator and many nodes share a single pair of wires.
//!
//! This crate implements the node side of the protocol using:
//! - `embedded-hal` / `embedded-hal-nb` traits for the UART, the direction-enable
//!   pin and busy-wait delays
//! - interrupt-safe shared state with `critical-section`
//! - fixed-capacity `heapless` buffers, no allocator
//! - `rand_core` for address selection and retry backoff
//!
//! ## Crate features
//! | Feature     | Description |
//! |-------------|-------------|
//! | `std`       | Disables `#![no_std]` |
//! | `defmt-0-3` | Uses `defmt` logging |
//! | `log`       | Uses `log` logging |
//!
//! ## Protocol Features
//!
//! - **Byte-stuffed framing**: `START payload END`, reserved bytes escaped
//! - **CRC-8** over header and command blocks
//! - **Echo-verified transmission**: every node hears its own frame and compares
//!   it, retrying on collision or silence a bounded number of times
//! - **Roll-call addressing**: nodes draw random addresses, answer roll calls in
//!   address-dependent slots and resolve duplicates by blacklisting
//! - **Group commands** through a 32-bit mask over coordinator-assigned indices
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rollbus::node::{BusNode, NodeCfg};
//!
//! rollbus::init_bus_link!(BUS_LINK, <MyCfg as NodeCfg>::BUS_QUIET_MS);
//!
//! #[interrupt]
//! fn USART1() {
//!     rollbus::timer::on_rx_interrupt(&BUS_LINK, &mut uart_rx);
//! }
//!
//! #[interrupt]
//! fn TIM2() {
//!     rollbus::timer::on_timer_interrupt(&BUS_LINK);
//! }
//!
//! let mut node = BusNode::<MyCfg>::new(&BUS_LINK, uart_tx, de, None, delay, rng, board);
//! node.begin();
//! loop {
//!     node.poll();
//! }
//! ```
//!
//! ## Integration Notes
//!
//! - The timer interrupt must fire every millisecond, see [`timer::compute_ocr_value`]
//! - Both interrupts must stay enabled while the main loop transmits: the echo is
//!   observed by the receive interrupt while `transmit_now()` spins
//! - Only one [`node::BusNode`] may use a given link
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod macros;

pub use critical_section;
pub use heapless;

pub mod address;
pub mod consts;
pub mod crc;
pub mod encoding;
pub mod error;
pub mod link;
pub mod message;
pub mod node;
pub mod registration;
pub mod rx;
pub mod timer;
pub mod tx;

#[cfg(test)]
mod testutil;
