#[cfg(feature = "defmt-0-3")]
macro_rules! bus_log {
    (trace, $($arg:expr),* $(,)?) => { defmt::trace!($($arg),*) };
    (debug, $($arg:expr),* $(,)?) => { defmt::debug!($($arg),*) };
    (info,  $($arg:expr),* $(,)?) => { defmt::info!($($arg),*) };
    (warn,  $($arg:expr),* $(,)?) => { defmt::warn!($($arg),*) };
    (error, $($arg:expr),* $(,)?) => { defmt::error!($($arg),*) };
}

#[cfg(all(feature = "log", not(feature = "defmt-0-3")))]
macro_rules! bus_log {
    (trace, $($arg:expr),* $(,)?) => { log::trace!($($arg),*) };
    (debug, $($arg:expr),* $(,)?) => { log::debug!($($arg),*) };
    (info,  $($arg:expr),* $(,)?) => { log::info!($($arg),*) };
    (warn,  $($arg:expr),* $(,)?) => { log::warn!($($arg),*) };
    (error, $($arg:expr),* $(,)?) => { log::error!($($arg),*) };
}

#[cfg(not(any(feature = "log", feature = "defmt-0-3")))]
macro_rules! bus_log {
    ($level:ident, $($arg:expr),* $(,)?) => {{ $( let _ = &$arg; )* }};
}

macro_rules! bus_trace {
    ($($arg:expr),* $(,)?) => (bus_log!(trace, $($arg),*));
}

macro_rules! bus_debug {
    ($($arg:expr),* $(,)?) => (bus_log!(debug, $($arg),*));
}

macro_rules! bus_info {
    ($($arg:expr),* $(,)?) => (bus_log!(info, $($arg),*));
}

macro_rules! bus_warn {
    ($($arg:expr),* $(,)?) => (bus_log!(warn, $($arg),*));
}

macro_rules! bus_error {
    ($($arg:expr),* $(,)?) => (bus_log!(error, $($arg),*));
}
