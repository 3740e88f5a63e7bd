//! Debug logging utilities
//!
//! Debug output is enabled by `--log-debug` or `ADDONKIT_DEBUG=1`. When it is
//! off, the `debug!` macro only costs a flag check.

use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

/// Initialize debug mode from the command-line flag and environment.
///
/// Only the first call has any effect.
pub fn init_debug(enabled: bool) {
    let enabled = enabled || crate::env_vars::debug_requested();
    if DEBUG_ENABLED.set(enabled).is_err() {
        debug_log("Debug mode was already initialized");
    }
}

/// Check if debug mode is enabled
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.get().copied().unwrap_or(false)
}

/// Print a debug message if debug mode is enabled
pub fn debug_log(message: &str) {
    if is_debug_enabled() {
        eprintln!("[DEBUG] {message}");
    }
}

/// Macro for convenient debug logging
///
/// Usage: `debug!("message with {}", variable)`
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug_enabled() {
            eprintln!("[DEBUG] {}", format_args!($($arg)*));
        }
    };
}
