//! pgpb-log: class/level filtered debug logging
//!
//! Entries carry a numeric level code (see [`levels`]). A code passes when it
//! is `ALL_ERRORS` or when both its class bit and its level bit are enabled
//! in `DEBUG_LOG_LEVELS`. Passing entries are appended, one line per entry,
//! to `<LOG_FILE>.native` or, with `MAX_DEBUG_WRITES` set, to an alternating
//! pair `<LOG_FILE>.native1` / `<LOG_FILE>.native2`.
//!
//! ```text
//! [24-03-09 07:05:01.45] [062] [bridge.rs:118            ] Beginning decryption.
//! ```
//!
//! Without `LOG_FILE` the logger is silent.

/// Log through a specific [`DebugLogger`]; the message is only formatted when
/// the code passes the filter.
#[macro_export]
macro_rules! debug_log_to {
    ($logger:expr, $code:expr, $($arg:tt)+) => {{
        let logger: &$crate::DebugLogger = $logger;
        let code: $crate::levels::LevelCode = $code;
        if logger.enabled(code) {
            logger.log(
                code,
                $crate::SourceLocation::new(file!(), line!()),
                format_args!($($arg)+),
            );
        }
    }};
}

/// Log through the process-wide logger.
#[macro_export]
macro_rules! debug_log {
    ($code:expr, $($arg:tt)+) => {
        $crate::debug_log_to!($crate::global(), $code, $($arg)+)
    };
}

pub mod config;
pub mod layer;
pub mod levels;
pub mod logger;
pub mod sink;

pub use config::{LevelMasks, LogConfig};
pub use layer::DebugLogLayer;
pub use logger::{global, init_global, DebugLogger, LazyLogger, SourceLocation};
pub use sink::{LogSink, RotatingFileSink};
