//! The seam between the context pool / bridge and a cryptographic engine.

use secrecy::SecretString;
use std::path::Path;

use crate::error::EngineError;

/// Lifecycle of an engine and its operation contexts.
///
/// The pool calls `initialize` before the first context is created and
/// `shutdown` after the last one is freed; both happen under the pool lock.
pub trait CryptoEngine: Send + Sync {
    type Context: Send;

    fn initialize(&self) -> Result<(), EngineError>;

    /// Best effort; failures are not reported.
    fn shutdown(&self);

    fn new_context(&self) -> Result<Self::Context, EngineError>;

    fn free_context(&self, ctx: Self::Context);
}

/// Result of a decode call.
#[derive(Debug)]
pub enum DecodeOutcome {
    Decoded(Vec<u8>),
    /// The engine needed an interactive passphrase to continue.
    PassphraseRequired,
    Failed(EngineError),
}

/// Key-ring and encode/decode primitives.
///
/// Key rings, filters and key sets are owned values released on drop.
pub trait PgpEngine: CryptoEngine {
    type KeyRing;
    type Filter;
    type KeySet;

    /// Open a matched public/private key-ring pair.
    fn open_key_ring_pair(
        &self,
        ctx: &mut Self::Context,
        public: &Path,
        secret: &Path,
    ) -> Result<Self::KeyRing, EngineError>;

    /// Substring filter over key user ids.
    fn new_user_id_filter(
        &self,
        ctx: &mut Self::Context,
        pattern: &str,
    ) -> Result<Self::Filter, EngineError>;

    fn filter_key_set(
        &self,
        ctx: &mut Self::Context,
        ring: &Self::KeyRing,
        filter: &Self::Filter,
    ) -> Result<Self::KeySet, EngineError>;

    fn key_count(&self, set: &Self::KeySet) -> usize;

    /// Encrypt to every key in `recipients`.
    fn encode(
        &self,
        ctx: &mut Self::Context,
        recipients: &Self::KeySet,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    /// Decrypt with the private ring unlocked by `passphrase`.
    fn decode(
        &self,
        ctx: &mut Self::Context,
        ring: &Self::KeyRing,
        ciphertext: &[u8],
        passphrase: &SecretString,
    ) -> DecodeOutcome;
}
