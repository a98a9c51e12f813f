//! Interrupt plumbing for the [`BusLink`](crate::link::BusLink).
//!
//! The link needs two interrupt sources:
//! - the UART receive interrupt, which hands every byte to the link
//!   ([`on_rx_interrupt`])
//! - a 1 ms periodic timer, which drives the link's clock and bus-silence
//!   watchdog ([`on_timer_interrupt`])
//!
//! Contains helpers for configuring that timer, including:
//! - `compute_ocr_value`: runtime OCR calculator
//! - `const_ocr_value`: compile-time OCR calculator
//! - `frame_airtime_ms`: how long a frame occupies the bus, for sizing
//!   [`NodeCfg::ECHO_TIMEOUT_MS`](crate::node::NodeCfg::ECHO_TIMEOUT_MS)
//!
//! Common prescalers for a 1 ms tick: (For use with `compute_ocr_value` and `const_ocr_value`)
//!
//! | F_CPU    | PRESCALER | OCR |
//! |----------|-----------|-----|
//! |  16 MHz  |        64 | 249 |
//! |   8 MHz  |        64 | 124 |
//! |  72 MHz  |      1024 |  69 |

use libm::{ceil, round};

mod isr;
pub use isr::*;

mod macros;

/// The link expects one timer tick per millisecond.
pub const TICK_HZ: u32 = 1_000;

/// Bits on the wire per byte: start, eight data, stop.
pub const BITS_PER_BYTE: u32 = 10;

/// Computes the compare value for a 1 ms CTC-mode timer.
///
/// # Arguments
/// - `f_cpu`: CPU frequency in Hz
/// - `prescaler`: timer prescaler (e.g., 8, 64, 256)
///
/// # Returns
/// - OCR value for OCRnA (rounds to nearest integer). The counter counts
///   `0..=OCR`, so this is one less than the counts per tick.
pub fn compute_ocr_value(f_cpu: u32, prescaler: u32) -> u16 {
    let counts_per_tick = f64::from(f_cpu) / f64::from(prescaler) / f64::from(TICK_HZ);
    (round(counts_per_tick) as u16).saturating_sub(1)
}

/// Compile-time [`compute_ocr_value`].
pub const fn const_ocr_value(f_cpu: u32, prescaler: u32) -> u16 {
    let counts_per_tick = (f_cpu / prescaler + TICK_HZ / 2) / TICK_HZ;
    (counts_per_tick as u16).saturating_sub(1)
}

/// Milliseconds, rounded up, that `wire_len` escaped bytes occupy the bus at `baud`.
pub fn frame_airtime_ms(wire_len: usize, baud: u32) -> u32 {
    let bits = wire_len as f64 * f64::from(BITS_PER_BYTE);
    ceil(bits * f64::from(TICK_HZ) / f64::from(baud)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::MAX_FRAME_LEN;

    #[test]
    fn test_ocr_for_16mhz_avr() {
        assert_eq!(compute_ocr_value(16_000_000, 64), 249);
        assert_eq!(const_ocr_value(16_000_000, 64), 249);
    }

    #[test]
    fn test_ocr_runtime_and_const_agree() {
        for (f_cpu, prescaler) in [(8_000_000, 64), (72_000_000, 1024), (48_000_000, 8)] {
            assert_eq!(
                compute_ocr_value(f_cpu, prescaler),
                const_ocr_value(f_cpu, prescaler)
            );
        }
    }

    #[test]
    fn test_airtime_rounds_up() {
        assert_eq!(frame_airtime_ms(12, 9600), 13);
        assert_eq!(frame_airtime_ms(96, 9600), 100);
        assert!(frame_airtime_ms(MAX_FRAME_LEN, 115_200) >= 1);
    }
}
