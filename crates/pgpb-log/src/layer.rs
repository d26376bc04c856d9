//! Bridge from `tracing` events into the debug log files.

use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::levels::{LevelCode, ALL_ERRORS, ALL_WARNINGS, NORMAL_STATUS};
use crate::logger::{DebugLogger, SourceLocation};

/// Forwards `tracing` events to a [`DebugLogger`].
///
/// The level code comes from an integer `code` field on the event when
/// present, otherwise from the tracing level: ERROR maps to `ALL_ERRORS`,
/// WARN to `ALL_WARNINGS`, anything else to `NORMAL_STATUS`.
pub struct DebugLogLayer {
    logger: &'static DebugLogger,
}

impl DebugLogLayer {
    pub fn new(logger: &'static DebugLogger) -> Self {
        Self { logger }
    }
}

pub fn code_for_level(level: &Level) -> LevelCode {
    match *level {
        Level::ERROR => ALL_ERRORS,
        Level::WARN => ALL_WARNINGS,
        _ => NORMAL_STATUS,
    }
}

impl<S: Subscriber> Layer<S> for DebugLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.logger.has_output() {
            return;
        }
        let meta = event.metadata();
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let code = visitor.code.unwrap_or_else(|| code_for_level(meta.level()));
        if !self.logger.enabled(code) {
            return;
        }
        let location = SourceLocation::new(
            meta.file().unwrap_or(meta.target()),
            meta.line().unwrap_or(0),
        );
        self.logger
            .log(code, location, format_args!("{}{}", visitor.message, visitor.fields));
    }
}

#[derive(Default)]
struct EventVisitor {
    code: Option<LevelCode>,
    message: String,
    fields: String,
}

impl Visit for EventVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "code" {
            self.code = LevelCode::try_from(value).ok();
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "code" {
            self.code = LevelCode::try_from(value).ok();
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
