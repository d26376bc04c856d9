use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, BridgeResult};

/// Property key holding the active debug levels (`ALL` or numeric codes)
pub const DEBUG_LOG_LEVELS_PROP: &str = "DEBUG_LOG_LEVELS";

/// Property key holding the base name of the debug log files
pub const LOG_FILE_PROP: &str = "LOG_FILE";

/// Property key holding the rotation threshold in writes
pub const MAX_DEBUG_WRITES_PROP: &str = "MAX_DEBUG_WRITES";

/// Property key overriding the context pool's free-list capacity
pub const FREE_LIST_CAPACITY_PROP: &str = "PGP_FREE_LIST_CAPACITY";

/// Default number of recycled contexts kept by the pool
pub const DEFAULT_FREE_LIST_CAPACITY: usize = 10;

/// Top-level bridge configuration (loaded from pgpbridge.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub logging: LoggingConfig,
    pub pgp: PgpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `ALL` or a whitespace separated list of level codes
    pub debug_log_levels: Option<String>,
    /// Base name of the rotating log files (absent: no file output)
    pub log_file: Option<PathBuf>,
    /// Rotation threshold in writes (absent or 0: single growing file)
    pub max_debug_writes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgpConfig {
    /// Directory holding the key-ring pair
    pub key_ring_dir: Option<PathBuf>,
    /// File name of the public ring inside `key_ring_dir`
    pub public_ring: String,
    /// File name of the private ring inside `key_ring_dir`
    pub secret_ring: String,
    /// Maximum number of idle contexts kept for reuse
    pub free_list_capacity: usize,
}

impl Default for PgpConfig {
    fn default() -> Self {
        Self {
            key_ring_dir: None,
            public_ring: "pubring.pkr".into(),
            secret_ring: "secring.skr".into(),
            free_list_capacity: DEFAULT_FREE_LIST_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Parse a config file. A missing file yields the defaults; callers
    /// that want to report that should check before logging is up.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// The `[logging]` section as host properties, under the process environment.
    pub fn properties(&self) -> LayeredSource<EnvSource, MapSource> {
        LayeredSource::new(EnvSource, self.file_properties())
    }

    /// Properties taken from the file alone.
    pub fn file_properties(&self) -> MapSource {
        let mut map = MapSource::default();
        if let Some(levels) = &self.logging.debug_log_levels {
            map.insert(DEBUG_LOG_LEVELS_PROP, levels.clone());
        }
        if let Some(file) = &self.logging.log_file {
            map.insert(LOG_FILE_PROP, file.display().to_string());
        }
        if let Some(writes) = self.logging.max_debug_writes {
            map.insert(MAX_DEBUG_WRITES_PROP, writes.to_string());
        }
        map.insert(FREE_LIST_CAPACITY_PROP, self.pgp.free_list_capacity.to_string());
        map
    }
}

/// Key/value lookup into host-provided configuration.
///
/// The bridge never writes configuration; it only asks for single values.
pub trait PropertySource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Every key the bridge reads, in display order.
pub const PROPERTY_KEYS: [&str; 4] = [
    DEBUG_LOG_LEVELS_PROP,
    LOG_FILE_PROP,
    MAX_DEBUG_WRITES_PROP,
    FREE_LIST_CAPACITY_PROP,
];

/// Parse a property, treating unparseable values as absent.
pub fn get_parsed<T: std::str::FromStr>(props: &dyn PropertySource, key: &str) -> Option<T> {
    props.get(key).and_then(|v| v.trim().parse().ok())
}

/// Reads properties from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl PropertySource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// In-memory properties.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    values: HashMap<String, String>,
}

impl MapSource {
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }
}

impl PropertySource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Looks a key up in `primary`, then in `fallback`.
#[derive(Debug, Clone)]
pub struct LayeredSource<P, F> {
    primary: P,
    fallback: F,
}

impl<P: PropertySource, F: PropertySource> LayeredSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: PropertySource, F: PropertySource> PropertySource for LayeredSource<P, F> {
    fn get(&self, key: &str) -> Option<String> {
        self.primary.get(key).or_else(|| self.fallback.get(key))
    }
}
