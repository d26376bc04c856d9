//! One-shot encrypt and decrypt over a pooled context.
//!
//! Each call opens the key-ring pair fresh and drops it, together with any
//! filter or key set, before returning. The context goes back to the pool on
//! every path through the `PooledContext` guard.

use pgpb_log::debug_log;
use pgpb_log::levels::{ALL_ERRORS, IO_STATUS, MSG_STATUS, SYSTEM_CONFIG};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

use crate::age_engine::AgeEngine;
use crate::engine::{DecodeOutcome, PgpEngine};
use crate::error::ProcessingError;
use crate::keyring::KeyRingLayout;
use crate::pool::{global_pool, ContextPool};

/// Encrypt/decrypt front end over a context pool.
pub struct PgpBridge<'p, E: PgpEngine> {
    pool: &'p ContextPool<E>,
    layout: KeyRingLayout,
}

impl<'p, E: PgpEngine> PgpBridge<'p, E> {
    pub fn new(pool: &'p ContextPool<E>) -> Self {
        Self::with_layout(pool, KeyRingLayout::default())
    }

    pub fn with_layout(pool: &'p ContextPool<E>, layout: KeyRingLayout) -> Self {
        Self { pool, layout }
    }

    pub fn layout(&self) -> &KeyRingLayout {
        &self.layout
    }

    /// Decrypt `ciphertext` with the private ring in `key_ring_dir`.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        passphrase: &SecretString,
        key_ring_dir: &Path,
    ) -> Result<Vec<u8>, ProcessingError> {
        debug_log!(SYSTEM_CONFIG, "Decrypt buffer size: {}", ciphertext.len());
        debug_log!(
            SYSTEM_CONFIG,
            "Passphrase length: {}",
            passphrase.expose_secret().len()
        );
        debug_log!(SYSTEM_CONFIG, "Key ring directory: {}", key_ring_dir.display());

        self.decrypt_inner(ciphertext, passphrase, key_ring_dir)
            .inspect_err(|e| debug_log!(ALL_ERRORS, "ERROR: {e}"))
    }

    fn decrypt_inner(
        &self,
        ciphertext: &[u8],
        passphrase: &SecretString,
        key_ring_dir: &Path,
    ) -> Result<Vec<u8>, ProcessingError> {
        let engine = self.pool.engine();
        let mut ctx = self.pool.acquire()?;

        let ring = engine
            .open_key_ring_pair(
                &mut ctx,
                &self.layout.public_path(key_ring_dir),
                &self.layout.secret_path(key_ring_dir),
            )
            .map_err(|e| ProcessingError::KeyStoreOpen(e.to_string()))?;
        debug_log!(IO_STATUS, "Opened key ring pair.");

        debug_log!(MSG_STATUS, "Beginning decryption.");
        match engine.decode(&mut ctx, &ring, ciphertext, passphrase) {
            DecodeOutcome::Decoded(plaintext) => {
                debug_log!(MSG_STATUS, "Decrypted {} bytes.", plaintext.len());
                Ok(plaintext)
            }
            DecodeOutcome::PassphraseRequired => Err(ProcessingError::InvalidPassphrase),
            DecodeOutcome::Failed(e) => Err(ProcessingError::Decode(e.to_string())),
        }
    }

    /// Encrypt `plaintext` to every public key whose user id contains
    /// `recipient_key_id`.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        recipient_key_id: &str,
        key_ring_dir: &Path,
    ) -> Result<Vec<u8>, ProcessingError> {
        debug_log!(SYSTEM_CONFIG, "Encrypt buffer size: {}", plaintext.len());
        debug_log!(SYSTEM_CONFIG, "Recipient key id: {recipient_key_id}");
        debug_log!(SYSTEM_CONFIG, "Key ring directory: {}", key_ring_dir.display());

        self.encrypt_inner(plaintext, recipient_key_id, key_ring_dir)
            .inspect_err(|e| debug_log!(ALL_ERRORS, "ERROR: {e}"))
    }

    fn encrypt_inner(
        &self,
        plaintext: &[u8],
        recipient_key_id: &str,
        key_ring_dir: &Path,
    ) -> Result<Vec<u8>, ProcessingError> {
        let engine = self.pool.engine();
        let mut ctx = self.pool.acquire()?;

        let ring = engine
            .open_key_ring_pair(
                &mut ctx,
                &self.layout.public_path(key_ring_dir),
                &self.layout.secret_path(key_ring_dir),
            )
            .map_err(|e| ProcessingError::KeyStoreOpen(e.to_string()))?;
        debug_log!(IO_STATUS, "Opened key ring pair.");

        let filter = engine
            .new_user_id_filter(&mut ctx, recipient_key_id)
            .map_err(|e| ProcessingError::KeyFilter(e.to_string()))?;
        let recipients = engine
            .filter_key_set(&mut ctx, &ring, &filter)
            .map_err(|e| ProcessingError::KeyFilter(e.to_string()))?;

        let count = engine.key_count(&recipients);
        if count == 0 {
            return Err(ProcessingError::KeyNotFound(recipient_key_id.to_string()));
        }
        debug_log!(MSG_STATUS, "Beginning encryption to {count} keys.");

        let ciphertext = engine
            .encode(&mut ctx, &recipients, plaintext)
            .map_err(|e| ProcessingError::Encode(e.to_string()))?;
        debug_log!(MSG_STATUS, "Encrypted {} bytes.", ciphertext.len());
        Ok(ciphertext)
    }
}

/// Decrypt through the process-wide pool with the default ring names.
pub fn decrypt(
    ciphertext: &[u8],
    passphrase: &SecretString,
    key_ring_dir: &Path,
) -> Result<Vec<u8>, ProcessingError> {
    PgpBridge::<AgeEngine>::new(global_pool()).decrypt(ciphertext, passphrase, key_ring_dir)
}

/// Encrypt through the process-wide pool with the default ring names.
pub fn encrypt(
    plaintext: &[u8],
    recipient_key_id: &str,
    key_ring_dir: &Path,
) -> Result<Vec<u8>, ProcessingError> {
    PgpBridge::<AgeEngine>::new(global_pool()).encrypt(plaintext, recipient_key_id, key_ring_dir)
}
