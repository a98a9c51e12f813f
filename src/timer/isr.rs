use crate::link::{BusLink, SharedLink, with_link};
use core::cell::RefCell;
use critical_section::Mutex;
use embedded_hal_nb::serial;

/// Builds an idle [`SharedLink`], usable in a `static` initializer.
///
/// # Arguments
/// * How long a frame may stall before the watchdog drops it, in ms
///
/// # Example
/// ```rust
/// use rollbus::link::SharedLink;
/// use rollbus::timer::shared_link;
///
/// static BUS_LINK: SharedLink = shared_link(5);
/// ```
pub const fn shared_link(quiet_limit_ms: u32) -> SharedLink {
    Mutex::new(RefCell::new(BusLink::new(quiet_limit_ms)))
}

/// Drains the UART receive register into the link.
///
/// Reads until the port reports `WouldBlock` or an error, so a single
/// interrupt can absorb a FIFO's worth of bytes.
///
/// # Returns
/// * The number of bytes handed to the link
///
///# Example
/// ```rust,ignore
/// #[interrupt]
/// fn USART1() {
///     rollbus::timer::on_rx_interrupt(&BUS_LINK, &mut *UART_RX.borrow(cs));
/// }
/// ```
pub fn on_rx_interrupt<S: serial::Read<u8>>(link: &SharedLink, serial: &mut S) -> usize {
    let mut count = 0;
    loop {
        match serial.read() {
            Ok(byte) => {
                with_link(link, |l| l.on_byte(byte));
                count += 1;
            }
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(_)) => {
                // framing and overrun errors: the watchdog cleans up the frame
                bus_trace!("uart error after {} bytes", count);
                break;
            }
        }
    }
    count
}

/// Runs the link's 1 ms tick.
///
///# Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIM2() {
///     rollbus::timer::on_timer_interrupt(&BUS_LINK);
/// }
/// ```
pub fn on_timer_interrupt(link: &SharedLink) {
    with_link(link, |l| l.tick());
}
