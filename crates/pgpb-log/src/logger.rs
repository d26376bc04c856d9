//! The debug logger and its process-wide lazy instance.

use chrono::{DateTime, Local, Timelike};
use pgpb_core::{EnvSource, PropertySource};
use std::fmt::{self, Write as _};
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::config::{LevelMasks, LogConfig};
use crate::levels::LevelCode;
use crate::sink::{LogSink, RotatingFileSink};

/// Default capacity of the shared formatting buffer
pub const BUFFER_SIZE: usize = 1024;

/// Maximum characters of the file name kept in a source tag
const FILE_TAG_WIDTH: usize = 20;

/// Where a log call came from: `<file basename>:<line>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    file: &'static str,
    line: u32,
}

impl SourceLocation {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self
            .file
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(self.file);
        let tag: String = base.chars().take(FILE_TAG_WIDTH).collect();
        write!(f, "{tag}:{}", self.line)
    }
}

/// Class/level filtered logger writing one line per entry to a sink.
///
/// Filtering reads only immutable masks and never allocates. Formatting goes
/// through a shared scratch buffer guarded by its own lock.
pub struct DebugLogger {
    masks: LevelMasks,
    sink: Option<Box<dyn LogSink>>,
    format_buf: Mutex<String>,
}

impl DebugLogger {
    pub fn new(masks: LevelMasks, sink: Option<Box<dyn LogSink>>) -> Self {
        Self {
            masks,
            sink,
            format_buf: Mutex::new(String::with_capacity(BUFFER_SIZE)),
        }
    }

    /// A logger that never writes anything.
    pub fn disabled() -> Self {
        Self::new(LevelMasks::none(), None)
    }

    pub fn from_config(config: LogConfig) -> Self {
        let sink = config.base_name.map(|base| {
            Box::new(RotatingFileSink::new(base, config.max_writes)) as Box<dyn LogSink>
        });
        Self::new(config.masks, sink)
    }

    pub fn from_properties(props: &dyn PropertySource) -> Self {
        Self::from_config(LogConfig::from_properties(props))
    }

    /// True when an entry at `code` would be written.
    #[inline]
    pub fn enabled(&self, code: LevelCode) -> bool {
        self.sink.is_some() && self.masks.allows(code)
    }

    /// Whether any destination is configured at all.
    pub fn has_output(&self) -> bool {
        self.sink.is_some()
    }

    /// Write one entry if `code` passes the filter.
    ///
    /// Sink failures are dropped; logging never fails the caller.
    pub fn log(&self, code: LevelCode, location: SourceLocation, args: fmt::Arguments<'_>) {
        let Some(sink) = &self.sink else {
            return;
        };
        if !self.masks.allows(code) {
            return;
        }

        let ts = timestamp(&Local::now());
        let message = self.format(args);
        let line = format_line(&ts, code, &location.to_string(), &message);
        let _ = sink.write_line(&line);
    }

    /// Render `args` through the shared buffer.
    ///
    /// The first pass writes at most the buffer's capacity while counting the
    /// full length; if the message did not fit, the buffer is reserved to the
    /// exact size and the message formatted again.
    fn format(&self, args: fmt::Arguments<'_>) -> String {
        let mut buf = self
            .format_buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buf.clear();

        let limit = buf.capacity().max(BUFFER_SIZE);
        let mut writer = BoundedWriter {
            buf: &mut *buf,
            limit,
            needed: 0,
        };
        let _ = writer.write_fmt(args);
        let needed = writer.needed;

        if needed > limit {
            buf.clear();
            buf.reserve_exact(needed);
            let _ = buf.write_fmt(args);
        }

        let message = buf.clone();
        if buf.capacity() > BUFFER_SIZE {
            buf.clear();
            buf.shrink_to(BUFFER_SIZE);
        }
        message
    }
}

impl fmt::Debug for DebugLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLogger")
            .field("masks", &self.masks)
            .field("has_output", &self.has_output())
            .finish()
    }
}

/// Writes up to `limit` bytes, counting everything it was asked to write.
struct BoundedWriter<'a> {
    buf: &'a mut String,
    limit: usize,
    needed: usize,
}

impl fmt::Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.needed += s.len();
        let room = self.limit.saturating_sub(self.buf.len());
        if s.len() <= room {
            self.buf.push_str(s);
        } else {
            let mut end = room;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            self.buf.push_str(&s[..end]);
        }
        Ok(())
    }
}

/// `YY-MM-DD HH:MM:SS.cc`, hundredths taken from the microseconds.
pub fn timestamp(now: &DateTime<Local>) -> String {
    let hundredths = (now.nanosecond() / 1_000 / 10_000).min(99);
    format!("{}.{hundredths:02}", now.format("%y-%m-%d %H:%M:%S"))
}

/// `[<ts>] [<code>] [<source>] <message>\n` with fixed-width columns.
pub fn format_line(ts: &str, code: LevelCode, source: &str, message: &str) -> String {
    format!("[{ts:>20.20}] [{code:03}] [{source:<25.25}] {message}\n")
}

/// Process-wide logger, built on first use.
///
/// Uninitialized until the first `get`, Initialized forever after. The
/// already-initialized check is lock free; initialization itself runs under
/// `init_lock` so exactly one caller reads the configuration.
pub struct LazyLogger {
    init_lock: Mutex<()>,
    logger: OnceLock<DebugLogger>,
}

impl LazyLogger {
    pub const fn new() -> Self {
        Self {
            init_lock: Mutex::new(()),
            logger: OnceLock::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.logger.get().is_some()
    }

    /// The logger, initializing it from the environment if needed.
    pub fn get(&self) -> &DebugLogger {
        self.get_or_init_with(&EnvSource)
    }

    /// The logger, initializing it from `props` if needed.
    ///
    /// Once initialized, `props` is ignored.
    pub fn get_or_init_with(&self, props: &dyn PropertySource) -> &DebugLogger {
        if let Some(logger) = self.logger.get() {
            return logger;
        }
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.logger
            .get_or_init(|| DebugLogger::from_properties(props))
    }
}

impl Default for LazyLogger {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: LazyLogger = LazyLogger::new();

/// The process-wide logger, configured from the environment on first use.
pub fn global() -> &'static DebugLogger {
    GLOBAL.get()
}

/// Initialize the process-wide logger from `props` unless already done.
pub fn init_global(props: &dyn PropertySource) -> &'static DebugLogger {
    GLOBAL.get_or_init_with(props)
}
