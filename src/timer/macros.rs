/// Declares a static [`SharedLink`](crate::link::SharedLink) protected by a `critical_section` mutex.
///
/// This macro creates a `static` singleton suitable for use in
/// interrupt-based environments, where the receive interrupt, the timer
/// interrupt and the main loop all need to reach the same link.
///
/// # Arguments
/// - `$name`: name of the static, `BUS_LINK` if omitted
/// - `$quiet_ms`: bus-silence watchdog interval, usually `NodeCfg::BUS_QUIET_MS`
///
/// # Example
/// ```rust
/// rollbus::init_bus_link!(5);
///
/// fn tick() {
///     rollbus::timer::on_timer_interrupt(&BUS_LINK);
/// }
/// ```
#[macro_export]
macro_rules! init_bus_link {
    ( $name:ident, $quiet_ms:expr ) => {
        /// Bus link shared by the interrupts and the main loop.
        pub static $name: $crate::link::SharedLink = $crate::timer::shared_link($quiet_ms);
    };
    ( $quiet_ms:expr ) => {
        $crate::init_bus_link!(BUS_LINK, $quiet_ms);
    };
}
