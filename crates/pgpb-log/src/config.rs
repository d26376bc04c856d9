//! Logger configuration: level masks, base file name and rotation threshold.

use pgpb_core::config::{DEBUG_LOG_LEVELS_PROP, LOG_FILE_PROP, MAX_DEBUG_WRITES_PROP};
use pgpb_core::{get_parsed, PropertySource};
use std::path::PathBuf;

use crate::levels::{self, LevelCode, CLASS_COUNT};

/// Active classes plus, per class, the active level bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMasks {
    class_mask: u32,
    level_masks: [u32; CLASS_COUNT],
}

impl LevelMasks {
    /// Nothing enabled; only `ALL_ERRORS` passes.
    pub fn none() -> Self {
        Self {
            class_mask: 0,
            level_masks: [0; CLASS_COUNT],
        }
    }

    /// Every class and level enabled.
    pub fn all() -> Self {
        Self {
            class_mask: u32::MAX,
            level_masks: [u32::MAX; CLASS_COUNT],
        }
    }

    /// Parse `ALL` (any case) or a whitespace separated list of codes.
    ///
    /// Tokens that are not valid codes are skipped.
    pub fn parse(text: &str) -> Self {
        if text.trim().eq_ignore_ascii_case("ALL") {
            return Self::all();
        }
        let mut masks = Self::none();
        for token in text.split_whitespace() {
            if let Ok(code) = token.parse::<LevelCode>() {
                masks.enable(code);
            }
        }
        masks
    }

    pub fn enable(&mut self, code: LevelCode) {
        if let Some((class, bit)) = levels::split(code) {
            self.class_mask |= 1 << class;
            self.level_masks[class] |= bit;
        }
    }

    /// Filter test: code 0 always passes, otherwise class AND level bit.
    #[inline]
    pub fn allows(&self, code: LevelCode) -> bool {
        if code == levels::ALL_ERRORS {
            return true;
        }
        match levels::split(code) {
            Some((class, bit)) => {
                self.class_mask & (1 << class) != 0 && self.level_masks[class] & bit != 0
            }
            None => false,
        }
    }
}

impl Default for LevelMasks {
    fn default() -> Self {
        Self::none()
    }
}

/// Snapshot of the logging properties, read once at initialization.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub masks: LevelMasks,
    /// Base name of the log files; `None` disables output
    pub base_name: Option<PathBuf>,
    /// Rotation threshold in writes; 0 disables rotation
    pub max_writes: u64,
}

impl LogConfig {
    pub fn from_properties(props: &dyn PropertySource) -> Self {
        let masks = props
            .get(DEBUG_LOG_LEVELS_PROP)
            .map(|levels| LevelMasks::parse(&levels))
            .unwrap_or_default();
        let base_name = props
            .get(LOG_FILE_PROP)
            .filter(|name| !name.trim().is_empty())
            .map(PathBuf::from);
        let max_writes = get_parsed(props, MAX_DEBUG_WRITES_PROP).unwrap_or(0);

        Self {
            masks,
            base_name,
            max_writes,
        }
    }
}
