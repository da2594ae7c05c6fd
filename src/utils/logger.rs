//! Logging utilities using the tracing framework

use std::fmt::Display;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter directive for a `-v` count: warn, info, debug, trace
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `-v` when set.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 2))
        .with(filter)
        .try_init();
}

pub fn log_info<T: Display>(msg: T) {
    tracing::info!("{}", msg);
}

pub fn log_warn<T: Display>(msg: T) {
    tracing::warn!("{}", msg);
}

pub fn log_error<T: Display>(msg: T) {
    tracing::error!("{}", msg);
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_warn(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_error(format!($($arg)*))
    };
}
