use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Message reported when decoding stops at a passphrase request.
pub const INVALID_PASSPHRASE_MSG: &str = "Decoding failed due to an invalid pass phrase or key.  \
     Please verify that PRIVATE_KEY_PASSCODE and RING_DIR_PATH are correct.";

/// Failure of an encrypt/decrypt call, as reported to the calling application.
///
/// Every variant carries a human-readable message; no variant is retried
/// inside the bridge.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("PGP engine initialization failed: {0}")]
    EngineInit(String),

    #[error("Could not create a PGP context: {0}")]
    ContextCreate(String),

    #[error("Error opening key pair: {0}")]
    KeyStoreOpen(String),

    #[error("Could not create a key filter: {0}")]
    KeyFilter(String),

    #[error("Could not find the specified key: {0}")]
    KeyNotFound(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    /// Decoding stopped because the engine asked for a passphrase.
    #[error("{}", INVALID_PASSPHRASE_MSG)]
    InvalidPassphrase,

    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Error reported by a cryptographic engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not initialized")]
    NotInitialized,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("{0}")]
    Crypto(String),
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn crypto(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Crypto(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_passphrase_message() {
        let msg = ProcessingError::InvalidPassphrase.to_string();
        assert!(msg.contains("invalid pass phrase or key"));
    }

    #[test]
    fn engine_error_text_is_carried() {
        let err = ProcessingError::Decode(EngineError::crypto("decrypting", "no matching keys").to_string());
        assert_eq!(err.to_string(), "Decoding failed: decrypting: no matching keys");
    }
}
