//! Engine backed by the `age` crate.
//!
//! Public keys are x25519 recipients; the private ring is unlocked with the
//! caller's passphrase for each decode and never cached. A passphrase that is
//! empty or does not open the private ring is reported as a passphrase
//! request, since no one is around to type a better one.

use age::armor::ArmoredReader;
use age::x25519;
use pgpb_log::debug_log;
use pgpb_log::levels::{IO_STATUS, MSG_STATUS, OBJECT_LIFECYCLE};
use secrecy::{ExposeSecret, SecretString};
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use zeroize::Zeroizing;

use crate::engine::{CryptoEngine, DecodeOutcome, PgpEngine};
use crate::error::EngineError;
use crate::keyring::{armored_encrypt, is_passphrase_protected, parse_public_ring, PublicKey};

type BoxedIdentity = Box<dyn age::Identity>;

const SELF_TEST_PLAINTEXT: &[u8] = b"pgpbridge engine self-test";

/// Per-operation state handed out by the pool.
#[derive(Debug)]
pub struct AgeContext {
    id: u64,
    operations: u64,
}

impl AgeContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Encode/decode calls made through this context.
    pub fn operations(&self) -> u64 {
        self.operations
    }
}

/// An opened public/private ring pair.
pub struct AgeKeyRing {
    public: Vec<PublicKey>,
    locked_secret: Vec<u8>,
}

impl AgeKeyRing {
    pub fn public_keys(&self) -> &[PublicKey] {
        &self.public
    }

    /// Decrypt the private ring and parse its identities.
    fn unlock(&self, passphrase: &SecretString) -> Result<Vec<BoxedIdentity>, Unlock> {
        let decryptor = age::Decryptor::new(ArmoredReader::new(&self.locked_secret[..]))
            .map_err(|e| Unlock::Failed(EngineError::crypto("reading private key ring", e)))?;

        let mut scrypt =
            age::scrypt::Identity::new(SecretString::from(passphrase.expose_secret().to_owned()));
        scrypt.set_max_work_factor(30);

        let mut reader = match decryptor.decrypt(std::iter::once(&scrypt as &dyn age::Identity)) {
            Ok(reader) => reader,
            Err(age::DecryptError::DecryptionFailed | age::DecryptError::NoMatchingKeys) => {
                return Err(Unlock::BadPassphrase)
            }
            Err(e) => {
                return Err(Unlock::Failed(EngineError::crypto(
                    "unlocking private key ring",
                    e,
                )))
            }
        };

        let mut plain = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut plain)
            .map_err(|e| Unlock::Failed(EngineError::crypto("reading private key ring", e)))?;

        age::IdentityFile::from_buffer(BufReader::new(&plain[..]))
            .map_err(|e| Unlock::Failed(EngineError::crypto("parsing private key ring", e)))?
            .into_identities()
            .map_err(|e| Unlock::Failed(EngineError::crypto("parsing private key ring", e)))
    }
}

enum Unlock {
    BadPassphrase,
    Failed(EngineError),
}

/// Case-insensitive substring match on user ids.
#[derive(Debug, Clone)]
pub struct UserIdFilter {
    needle: String,
}

impl UserIdFilter {
    pub fn matches(&self, user_id: &str) -> bool {
        user_id.to_lowercase().contains(&self.needle)
    }
}

/// Keys selected from a public ring.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    keys: Vec<PublicKey>,
}

impl RecipientSet {
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }
}

/// age-backed engine. One instance serves a whole pool.
#[derive(Debug, Default)]
pub struct AgeEngine {
    active: AtomicBool,
    next_context: AtomicU64,
}

impl AgeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn self_test() -> Result<(), EngineError> {
        let identity = x25519::Identity::generate();
        let recipient = identity.to_public();
        let sealed = encrypt_to(&[recipient], SELF_TEST_PLAINTEXT)?;
        let identities: Vec<BoxedIdentity> = vec![Box::new(identity)];
        let opened = decrypt_with(&identities, &sealed)?;
        if opened != SELF_TEST_PLAINTEXT {
            return Err(EngineError::Crypto("self-test round trip mismatch".into()));
        }
        Ok(())
    }
}

fn encrypt_to(recipients: &[x25519::Recipient], plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
    let encryptor =
        age::Encryptor::with_recipients(recipients.iter().map(|r| r as &dyn age::Recipient))
            .map_err(|e| EngineError::crypto("preparing encryption", e))?;
    armored_encrypt(encryptor, plaintext)
}

fn decrypt_with(identities: &[BoxedIdentity], ciphertext: &[u8]) -> Result<Vec<u8>, EngineError> {
    let decryptor = age::Decryptor::new(ArmoredReader::new(ciphertext))
        .map_err(|e| EngineError::crypto("reading message", e))?;
    if decryptor.is_scrypt() {
        return Err(EngineError::Crypto(
            "message is passphrase encrypted, not addressed to a key".into(),
        ));
    }
    let mut reader = decryptor
        .decrypt(identities.iter().map(|i| i.as_ref() as &dyn age::Identity))
        .map_err(|e| EngineError::crypto("decrypting message", e))?;

    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| EngineError::crypto("reading decrypted data", e))?;
    Ok(plaintext)
}

impl CryptoEngine for AgeEngine {
    type Context = AgeContext;

    fn initialize(&self) -> Result<(), EngineError> {
        Self::self_test()?;
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn new_context(&self) -> Result<AgeContext, EngineError> {
        if !self.is_active() {
            return Err(EngineError::NotInitialized);
        }
        let id = self.next_context.fetch_add(1, Ordering::Relaxed);
        debug_log!(OBJECT_LIFECYCLE, "Created context {id}.");
        Ok(AgeContext { id, operations: 0 })
    }

    fn free_context(&self, ctx: AgeContext) {
        debug_log!(
            OBJECT_LIFECYCLE,
            "Freed context {} after {} operations.",
            ctx.id,
            ctx.operations
        );
    }
}

impl PgpEngine for AgeEngine {
    type KeyRing = AgeKeyRing;
    type Filter = UserIdFilter;
    type KeySet = RecipientSet;

    fn open_key_ring_pair(
        &self,
        _ctx: &mut AgeContext,
        public: &Path,
        secret: &Path,
    ) -> Result<AgeKeyRing, EngineError> {
        debug_log!(IO_STATUS, "Opening public key ring {}", public.display());
        let public_text =
            std::fs::read_to_string(public).map_err(|e| EngineError::io(public, e))?;
        debug_log!(IO_STATUS, "Opening private key ring {}", secret.display());
        let locked_secret = std::fs::read(secret).map_err(|e| EngineError::io(secret, e))?;

        let public_keys = parse_public_ring(&public_text)?;
        if !is_passphrase_protected(&locked_secret)? {
            return Err(EngineError::Malformed {
                what: "private key ring",
                detail: "not protected by a passphrase".into(),
            });
        }
        debug_log!(IO_STATUS, "Opened key pair with {} public keys.", public_keys.len());

        Ok(AgeKeyRing {
            public: public_keys,
            locked_secret,
        })
    }

    fn new_user_id_filter(
        &self,
        _ctx: &mut AgeContext,
        pattern: &str,
    ) -> Result<UserIdFilter, EngineError> {
        let needle = pattern.trim();
        if needle.is_empty() {
            return Err(EngineError::Malformed {
                what: "key id",
                detail: "empty pattern".into(),
            });
        }
        Ok(UserIdFilter {
            needle: needle.to_lowercase(),
        })
    }

    fn filter_key_set(
        &self,
        _ctx: &mut AgeContext,
        ring: &AgeKeyRing,
        filter: &UserIdFilter,
    ) -> Result<RecipientSet, EngineError> {
        Ok(RecipientSet {
            keys: ring
                .public
                .iter()
                .filter(|k| filter.matches(&k.user_id))
                .cloned()
                .collect(),
        })
    }

    fn key_count(&self, set: &RecipientSet) -> usize {
        set.keys.len()
    }

    fn encode(
        &self,
        ctx: &mut AgeContext,
        recipients: &RecipientSet,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        ctx.operations += 1;
        let keys: Vec<x25519::Recipient> =
            recipients.keys.iter().map(|k| k.recipient.clone()).collect();
        encrypt_to(&keys, plaintext)
    }

    fn decode(
        &self,
        ctx: &mut AgeContext,
        ring: &AgeKeyRing,
        ciphertext: &[u8],
        passphrase: &SecretString,
    ) -> DecodeOutcome {
        ctx.operations += 1;
        if passphrase.expose_secret().is_empty() {
            debug_log!(MSG_STATUS, "Received a passphrase request, failing.");
            return DecodeOutcome::PassphraseRequired;
        }

        let identities = match ring.unlock(passphrase) {
            Ok(ids) => ids,
            Err(Unlock::BadPassphrase) => {
                debug_log!(MSG_STATUS, "Received a passphrase request, failing.");
                return DecodeOutcome::PassphraseRequired;
            }
            Err(Unlock::Failed(e)) => return DecodeOutcome::Failed(e),
        };

        match decrypt_with(&identities, ciphertext) {
            Ok(plaintext) => DecodeOutcome::Decoded(plaintext),
            Err(e) => DecodeOutcome::Failed(e),
        }
    }
}
