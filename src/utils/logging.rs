//! Switchable, tagged logging for the background loops.
//!
//! A module opts in by declaring two consts next to its imports:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "[monitor]";
//! ```
//! and then calls `log_info!`/`log_warn!`/`log_error!` like the `log` macros. Flipping
//! `ENABLE_LOGS` to `false` silences the module without touching `RUST_LOG`.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}
