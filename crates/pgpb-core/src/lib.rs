//! pgpb-core: configuration schema and host property lookup shared by the
//! logging and crypto crates.

pub mod config;
pub mod error;

pub use config::{get_parsed, BridgeConfig, EnvSource, LayeredSource, MapSource, PropertySource};
pub use error::{BridgeError, BridgeResult};
