//! Quarry logging facade.
//!
//! This crate is a facade of the [`log`] crate so that callers do not couple
//! with a concrete logging implementation. The binary decides how records are
//! emitted; library crates only ever depend on this facade.

pub use log::{self, debug, error, info, log_enabled, trace, warn, Level};

/// Logs a message at the trace level using a target.
#[macro_export]
macro_rules! trace_target {
    ($target:expr, $( $args:tt )*) => {
        $crate::log::trace!(target: $target, $( $args )*);
    }
}

/// Logs a message at the debug level using a target.
#[macro_export]
macro_rules! debug_target {
    ($target:expr, $( $args:tt )*) => {
        $crate::log::debug!(target: $target, $( $args )*);
    }
}

/// Logs a message at the info level using a target.
#[macro_export]
macro_rules! info_target {
    ($target:expr, $( $args:tt )*) => {
        $crate::log::info!(target: $target, $( $args )*);
    }
}

/// Logs a message at the warn level using a target.
#[macro_export]
macro_rules! warn_target {
    ($target:expr, $( $args:tt )*) => {
        $crate::log::warn!(target: $target, $( $args )*);
    }
}

/// Logs a message at the error level using a target.
#[macro_export]
macro_rules! error_target {
    ($target:expr, $( $args:tt )*) => {
        $crate::log::error!(target: $target, $( $args )*);
    }
}
