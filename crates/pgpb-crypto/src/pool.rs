//! Reference-counted engine lifecycle with a bounded free list of contexts.
//!
//! The first `acquire` brings the engine up; the release of the last
//! outstanding context frees every pooled context and shuts the engine down.
//! Between those points released contexts are kept (up to `capacity`) and
//! handed out again most-recently-released first.
//!
//! The reference count, the free list and the engine's initialized state are
//! only touched while holding the single pool lock, so no thread can see a
//! positive count with the engine down, or the reverse.

use pgpb_core::config::{DEFAULT_FREE_LIST_CAPACITY, FREE_LIST_CAPACITY_PROP};
use pgpb_core::{get_parsed, EnvSource, PropertySource};
use pgpb_log::debug_log;
use pgpb_log::levels::{ALL_ERRORS, ALL_WARNINGS, OBJECT_LIFECYCLE};
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::age_engine::AgeEngine;
use crate::engine::CryptoEngine;
use crate::error::ProcessingError;

struct PoolState<C> {
    outstanding: usize,
    free: Vec<C>,
}

/// Shares one engine among concurrent callers.
pub struct ContextPool<E: CryptoEngine> {
    engine: E,
    capacity: usize,
    state: Mutex<PoolState<E::Context>>,
}

impl<E: CryptoEngine> ContextPool<E> {
    pub fn new(engine: E) -> Self {
        Self::with_capacity(engine, DEFAULT_FREE_LIST_CAPACITY)
    }

    pub fn with_capacity(engine: E, capacity: usize) -> Self {
        Self {
            engine,
            capacity,
            state: Mutex::new(PoolState {
                outstanding: 0,
                free: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Capacity from `PGP_FREE_LIST_CAPACITY`, falling back to the default.
    pub fn from_properties(engine: E, props: &dyn PropertySource) -> Self {
        let capacity =
            get_parsed(props, FREE_LIST_CAPACITY_PROP).unwrap_or(DEFAULT_FREE_LIST_CAPACITY);
        Self::with_capacity(engine, capacity)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of contexts currently checked out.
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    /// Number of idle contexts waiting for reuse.
    pub fn free_len(&self) -> usize {
        self.lock().free.len()
    }

    pub fn is_engine_active(&self) -> bool {
        self.lock().outstanding > 0
    }

    // Release must never fail, so a poisoned lock is taken over as is.
    fn lock(&self) -> MutexGuard<'_, PoolState<E::Context>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a context, initializing the engine if nobody holds one.
    ///
    /// If a new context cannot be created the reference taken for it is
    /// given back, shutting the engine down again when it was the only one.
    pub fn acquire(&self) -> Result<PooledContext<'_, E>, ProcessingError> {
        let mut state = self.lock();

        if state.outstanding == 0 {
            if let Err(e) = self.engine.initialize() {
                debug_log!(ALL_ERRORS, "ERROR: engine initialization failed: {e}");
                return Err(ProcessingError::EngineInit(e.to_string()));
            }
            debug_log!(OBJECT_LIFECYCLE, "Engine initialized.");
        }
        state.outstanding += 1;

        let ctx = match state.free.pop() {
            Some(ctx) => ctx,
            None => match self.engine.new_context() {
                Ok(ctx) => ctx,
                Err(e) => {
                    state.outstanding -= 1;
                    if state.outstanding == 0 {
                        self.engine.shutdown();
                        debug_log!(OBJECT_LIFECYCLE, "Engine shut down after failed context creation.");
                    }
                    debug_log!(ALL_ERRORS, "ERROR: context creation failed: {e}");
                    return Err(ProcessingError::ContextCreate(e.to_string()));
                }
            },
        };

        Ok(PooledContext {
            pool: self,
            ctx: Some(ctx),
        })
    }

    fn release(&self, ctx: E::Context) {
        let mut state = self.lock();

        if state.outstanding > 1 {
            if state.free.len() < self.capacity {
                state.free.push(ctx);
            } else {
                self.engine.free_context(ctx);
            }
            state.outstanding -= 1;
            return;
        }

        if state.outstanding == 0 {
            debug_log!(ALL_WARNINGS, "WARNING: context released with no outstanding references.");
        }
        self.engine.free_context(ctx);
        for idle in state.free.drain(..) {
            self.engine.free_context(idle);
        }
        self.engine.shutdown();
        state.outstanding = 0;
        debug_log!(OBJECT_LIFECYCLE, "Engine shut down.");
    }
}

/// A checked-out context. Dropping it returns the context to its pool.
pub struct PooledContext<'p, E: CryptoEngine> {
    pool: &'p ContextPool<E>,
    // `Some` until `drop` hands it back
    ctx: Option<E::Context>,
}

impl<E: CryptoEngine> PooledContext<'_, E> {
    /// Return the context now instead of at scope end.
    pub fn release(self) {
        drop(self);
    }
}

impl<E: CryptoEngine> Deref for PooledContext<'_, E> {
    type Target = E::Context;

    fn deref(&self) -> &E::Context {
        match &self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("pooled context used after release"),
        }
    }
}

impl<E: CryptoEngine> DerefMut for PooledContext<'_, E> {
    fn deref_mut(&mut self) -> &mut E::Context {
        match &mut self.ctx {
            Some(ctx) => ctx,
            None => unreachable!("pooled context used after release"),
        }
    }
}

impl<E: CryptoEngine> Drop for PooledContext<'_, E> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}

static GLOBAL_POOL: OnceLock<ContextPool<AgeEngine>> = OnceLock::new();

/// The process-wide pool over the age engine, configured from the
/// environment on first use.
pub fn global_pool() -> &'static ContextPool<AgeEngine> {
    init_global_pool(&EnvSource)
}

/// Build the process-wide pool from `props` unless it already exists.
pub fn init_global_pool(props: &dyn PropertySource) -> &'static ContextPool<AgeEngine> {
    GLOBAL_POOL.get_or_init(|| ContextPool::from_properties(AgeEngine::new(), props))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use pgpb_core::MapSource;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEngine {
        active: AtomicBool,
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
        created: AtomicUsize,
        freed: Mutex<Vec<usize>>,
        fail_init: AtomicBool,
        fail_context: AtomicBool,
    }

    impl CryptoEngine for CountingEngine {
        type Context = usize;

        fn initialize(&self) -> Result<(), EngineError> {
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(EngineError::Crypto("no entropy".into()));
            }
            assert!(!self.active.swap(true, Ordering::SeqCst), "double init");
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) {
            assert!(self.active.swap(false, Ordering::SeqCst), "shutdown while down");
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn new_context(&self) -> Result<usize, EngineError> {
            assert!(self.active.load(Ordering::SeqCst));
            if self.fail_context.load(Ordering::SeqCst) {
                return Err(EngineError::Crypto("out of contexts".into()));
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        fn free_context(&self, ctx: usize) {
            assert!(self.active.load(Ordering::SeqCst));
            self.freed.lock().unwrap().push(ctx);
        }
    }

    fn pool(capacity: usize) -> ContextPool<CountingEngine> {
        ContextPool::with_capacity(CountingEngine::default(), capacity)
    }

    #[test]
    fn first_acquire_initializes_last_release_shuts_down() {
        let pool = pool(10);
        assert!(!pool.is_engine_active());

        let ctx = pool.acquire().unwrap();
        assert!(pool.is_engine_active());
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.engine().inits.load(Ordering::SeqCst), 1);

        ctx.release();
        assert!(!pool.is_engine_active());
        assert_eq!(pool.engine().shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(*pool.engine().freed.lock().unwrap(), vec![0]);
    }

    #[test]
    fn released_contexts_are_reused_lifo() {
        let pool = pool(10);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!((*a, *b, *c), (0, 1, 2));

        c.release();
        b.release();
        assert_eq!(pool.free_len(), 2);

        let next = pool.acquire().unwrap();
        assert_eq!(*next, 1);
        let after = pool.acquire().unwrap();
        assert_eq!(*after, 2);
        assert_eq!(pool.engine().created.load(Ordering::SeqCst), 3);

        drop((a, next, after));
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.engine().freed.lock().unwrap().len(), 3);
    }

    #[test]
    fn free_list_never_exceeds_capacity() {
        let pool = pool(2);
        let mut held: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        let last = held.remove(0);

        for ctx in held.drain(..) {
            ctx.release();
            assert!(pool.free_len() <= 2);
        }
        assert_eq!(pool.free_len(), 2);
        // two recycled, two destroyed straight away
        assert_eq!(pool.engine().freed.lock().unwrap().len(), 2);

        last.release();
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.engine().freed.lock().unwrap().len(), 5);
        assert_eq!(pool.engine().shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_capacity_destroys_every_release() {
        let pool = pool(0);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        b.release();
        assert_eq!(pool.free_len(), 0);
        assert_eq!(pool.engine().freed.lock().unwrap().len(), 1);
        a.release();
    }

    #[test]
    fn init_failure_leaves_pool_retryable() {
        let pool = pool(10);
        pool.engine().fail_init.store(true, Ordering::SeqCst);

        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, ProcessingError::EngineInit(_)));
        assert_eq!(pool.outstanding(), 0);

        pool.engine().fail_init.store(false, Ordering::SeqCst);
        let ctx = pool.acquire().unwrap();
        assert_eq!(pool.outstanding(), 1);
        ctx.release();
    }

    #[test]
    fn context_failure_rolls_back_only_reference() {
        let pool = pool(10);
        pool.engine().fail_context.store(true, Ordering::SeqCst);

        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, ProcessingError::ContextCreate(_)));
        assert_eq!(pool.outstanding(), 0);
        assert!(!pool.engine().active.load(Ordering::SeqCst));
        assert_eq!(pool.engine().shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn context_failure_keeps_engine_for_other_holders() {
        let pool = pool(10);
        let held = pool.acquire().unwrap();
        pool.engine().fail_context.store(true, Ordering::SeqCst);

        assert!(pool.acquire().is_err());
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.engine().active.load(Ordering::SeqCst));

        held.release();
        assert_eq!(pool.engine().shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recycled_context_survives_creation_failure() {
        let pool = pool(10);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        b.release();
        pool.engine().fail_context.store(true, Ordering::SeqCst);

        // the free list is consulted before the engine
        let again = pool.acquire().unwrap();
        assert_eq!(*again, 1);
        drop((a, again));
    }

    #[test]
    fn context_state_survives_recycling() {
        let pool = pool(10);
        let keep = pool.acquire().unwrap();
        let mut ctx = pool.acquire().unwrap();
        *ctx += 100;
        ctx.release();

        let again = pool.acquire().unwrap();
        assert_eq!(*again, 101);
        drop((keep, again));
        assert_eq!(*pool.engine().freed.lock().unwrap(), vec![101, 0]);
    }

    #[test]
    fn capacity_from_properties() {
        let props = MapSource::default().with(FREE_LIST_CAPACITY_PROP, "3");
        let pool = ContextPool::from_properties(CountingEngine::default(), &props);
        assert_eq!(pool.capacity(), 3);

        let pool = ContextPool::from_properties(CountingEngine::default(), &MapSource::default());
        assert_eq!(pool.capacity(), DEFAULT_FREE_LIST_CAPACITY);
    }
}
