//! Numeric debug level codes shared with the host runtime.
//!
//! A code encodes both a log class and a level within that class:
//! `class = code / 10`, `level bit = 1 << (code % 10)`. Codes below 10 form
//! the general class; `ALL_ERRORS` (0) bypasses filtering entirely.

/// A numeric debug level code
pub type LevelCode = u16;

/// Exclusive upper bound of valid level codes
pub const MAX_LEVELS: LevelCode = 300;

/// Number of log classes (one per decade of codes)
pub const CLASS_COUNT: usize = (MAX_LEVELS / 10) as usize;

pub const ALL_ERRORS: LevelCode = 0;
pub const ALL_WARNINGS: LevelCode = 1;
pub const NORMAL_STATUS: LevelCode = 2;
pub const EXCEPTION_CREATION: LevelCode = 3;
pub const EXCEPTION_STACK_TRACE: LevelCode = 4;
pub const MEM_USAGE: LevelCode = 5;
pub const SYSTEM_CONFIG: LevelCode = 6;
pub const OBJECT_LIFECYCLE: LevelCode = 7;
pub const UNIT_TEST: LevelCode = 8;
pub const ASSERT: LevelCode = 9;
pub const BENCHMARK: LevelCode = 10;

pub const THREAD_BASE: LevelCode = 20;
pub const THREAD_LIFECYCLE: LevelCode = THREAD_BASE + 1;
pub const THREAD_STATUS: LevelCode = THREAD_BASE + 2;

pub const IO_BASE: LevelCode = 30;
pub const IO_STATUS: LevelCode = IO_BASE + 1;
pub const IO_DATA: LevelCode = IO_BASE + 2;
pub const IO_PERF_TIMER: LevelCode = IO_BASE + 3;

pub const MSG_BASE: LevelCode = 60;
pub const MSG_LIFECYCLE: LevelCode = MSG_BASE + 1;
pub const MSG_STATUS: LevelCode = MSG_BASE + 2;
pub const MSG_DATA: LevelCode = MSG_BASE + 3;
pub const MSG_GENERATE: LevelCode = MSG_BASE + 4;
pub const MSG_PARSE: LevelCode = MSG_BASE + 5;

pub const SECURITY_BASE: LevelCode = 110;
pub const SECURITY_CONFIG: LevelCode = SECURITY_BASE + 1;
pub const SECURITY_LIFECYCLE: LevelCode = SECURITY_BASE + 2;

/// Split a code into its class index and level bit.
///
/// Returns `None` for codes outside `0..MAX_LEVELS`.
pub fn split(code: LevelCode) -> Option<(usize, u32)> {
    if code >= MAX_LEVELS {
        return None;
    }
    Some(((code / 10) as usize, 1u32 << (code % 10)))
}
