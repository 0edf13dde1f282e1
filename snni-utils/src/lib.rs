pub mod errors;
pub mod execute_main;

pub use log::debug as log_debug;

/// Prints to stderr, or routes the text to the `debug` log level when the
/// calling crate enables `stderr-to-log`.
#[doc(hidden)]
#[macro_export]
macro_rules! eprint_or_log {
    ($($x:tt)*) => {
        #[cfg(feature = "stderr-to-log")]
        $crate::log_debug!($($x)*);
        #[cfg(not(feature = "stderr-to-log"))]
        eprint!($($x)*);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! eprintln_or_log {
    ($($x:tt)*) => {
        #[cfg(feature = "stderr-to-log")]
        $crate::log_debug!($($x)*);
        #[cfg(not(feature = "stderr-to-log"))]
        eprintln!($($x)*);
    };
}
