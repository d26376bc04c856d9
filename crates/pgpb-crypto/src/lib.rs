//! pgpb-crypto: pooled encryption engine
//!
//! A [`ContextPool`] shares one engine among concurrent callers, bringing it
//! up on first use and tearing it down when the last context comes back.
//! [`PgpBridge`] runs one-shot [`encrypt`] / [`decrypt`] calls over the pool
//! against a key-ring directory; the bundled [`AgeEngine`] backs those calls
//! with the `age` format.

pub mod age_engine;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod keyring;
pub mod pool;

pub use age_engine::{AgeContext, AgeEngine, AgeKeyRing, RecipientSet, UserIdFilter};
pub use bridge::{decrypt, encrypt, PgpBridge};
pub use engine::{CryptoEngine, DecodeOutcome, PgpEngine};
pub use error::{EngineError, ProcessingError, INVALID_PASSPHRASE_MSG};
pub use keyring::{add_public_key, generate_key_ring_pair, KeyGenOptions, KeyRingLayout, PublicKey};
pub use pool::{global_pool, init_global_pool, ContextPool, PooledContext};
