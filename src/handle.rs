//! Reference-counted, disposable access point to the filtering engine.
//!
//! Two locks live here. The engine lock guards the engine itself and is held for
//! every query; teardown also takes it, so a query and a teardown never overlap.
//! The lifecycle lock guards the reference count, readiness and the
//! deferred-disposal bookkeeping, and is never held while a query runs, so page
//! navigation and releases do not wait behind a slow selector query.
//!
//! Teardown is deferred while an elemhide worker registered through
//! [`EngineHandle::begin_worker`] is still running. The worker's [`WorkerLease`]
//! performs the pending teardown when it is dropped.

use crate::engine::{EngineFactory, FilterEngine};

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Runs once a consumer's teardown has actually happened.
pub type DisposeCallback = Box<dyn FnOnce() + Send>;

struct Lifecycle {
    ref_count: usize,
    constructed: bool,
    initializing: bool,
    ready: bool,
    running_workers: usize,
    pending_disposal: bool,
    on_disposed: Vec<DisposeCallback>,
    disposals: u64,
}

struct HandleInner {
    factory: Arc<dyn EngineFactory>,
    lifecycle: Mutex<Lifecycle>,
    ready_cond: Condvar,
    engine: Mutex<Option<Box<dyn FilterEngine>>>,
    // Mirrors `ref_count > 0` so queries can check it under the engine lock alone.
    live: AtomicBool,
}

/// Cheap to clone; all clones share one engine and one lock.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lifecycle.lock();
        f.debug_struct("EngineHandle")
            .field("ref_count", &state.ref_count)
            .field("constructed", &state.constructed)
            .field("ready", &state.ready)
            .field("running_workers", &state.running_workers)
            .field("pending_disposal", &state.pending_disposal)
            .finish()
    }
}

impl EngineHandle {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self::from_factory(Arc::new(factory))
    }

    pub fn from_factory(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                factory,
                lifecycle: Mutex::new(Lifecycle {
                    ref_count: 0,
                    constructed: false,
                    initializing: false,
                    ready: false,
                    running_workers: 0,
                    pending_disposal: false,
                    on_disposed: Vec::new(),
                    disposals: 0,
                }),
                ready_cond: Condvar::new(),
                engine: Mutex::new(None),
                live: AtomicBool::new(false),
            }),
        }
    }

    /// Attach a consumer. The first attachment starts engine construction on a
    /// background thread; use [`wait_until_ready`](Self::wait_until_ready) to block on it.
    pub fn acquire(&self) {
        let mut state = self.inner.lifecycle.lock();
        state.ref_count += 1;
        debug!(ref_count = state.ref_count, "Engine handle acquired");
        if state.ref_count > 1 {
            return;
        }
        self.inner.live.store(true, Ordering::SeqCst);

        if state.constructed {
            if state.pending_disposal {
                info!("Engine re-acquired before deferred disposal, keeping it");
                state.pending_disposal = false;
            }
            return;
        }

        if !state.initializing {
            state.initializing = true;
            state.ready = false;
            drop(state);
            self.spawn_initialization();
        }
    }

    fn spawn_initialization(&self) {
        let handle = self.clone();
        let spawned = std::thread::Builder::new()
            .name("engine-init".to_string())
            .spawn(move || handle.initialize());
        if let Err(e) = spawned {
            warn!("Could not spawn engine init thread, initializing inline: {}", e);
            self.initialize();
        }
    }

    fn initialize(&self) {
        let created = self.inner.factory.create();

        let mut state = self.inner.lifecycle.lock();
        state.initializing = false;
        match created {
            Ok(engine) if state.ref_count > 0 => {
                *self.inner.engine.lock() = Some(engine);
                state.constructed = true;
                info!("Filter engine ready");
            }
            Ok(engine) => {
                debug!("Engine released before it was ready, dropping it");
                drop(engine);
            }
            Err(e) => error!("Filter engine construction failed, requests will be allowed: {:#}", e),
        }
        state.ready = true;
        self.inner.ready_cond.notify_all();
    }

    /// Blocks until engine construction has finished. Returns `false` when the handle
    /// is disposed (or construction failed), which callers treat as "allow".
    pub fn wait_until_ready(&self) -> bool {
        let mut state = self.inner.lifecycle.lock();
        while state.ref_count > 0 && !state.ready {
            self.inner.ready_cond.wait(&mut state);
        }
        state.ref_count > 0 && state.constructed
    }

    /// Runs `query` with the engine lock held. Returns `None`, without running
    /// `query`, when the handle is disposed or has no engine.
    pub fn with_engine<R>(&self, query: impl FnOnce(&dyn FilterEngine) -> R) -> Option<R> {
        if !self.wait_until_ready() {
            return None;
        }
        let engine = self.inner.engine.lock();
        if !self.inner.live.load(Ordering::SeqCst) {
            return None;
        }
        Some(query(engine.as_deref()?))
    }

    /// Detach a consumer. See [`release_then`](Self::release_then).
    pub fn release(&self) {
        self.release_then(None);
    }

    /// Detach a consumer and run `on_disposed` once this detachment is complete: right
    /// away if other consumers remain or nothing is running, otherwise when the last
    /// running elemhide worker completes and the deferred teardown happens.
    pub fn release_then(&self, on_disposed: Option<DisposeCallback>) {
        let mut state = self.inner.lifecycle.lock();
        debug_assert!(state.ref_count > 0, "EngineHandle released more times than acquired");
        if state.ref_count == 0 {
            error!("EngineHandle released more times than acquired, ignoring");
            return;
        }

        state.ref_count -= 1;
        debug!(ref_count = state.ref_count, "Engine handle released");
        if state.ref_count > 0 {
            drop(state);
            run_callbacks(on_disposed.into_iter().collect());
            return;
        }

        self.inner.live.store(false, Ordering::SeqCst);
        // Wake anyone blocked on readiness; they now observe a disposed handle.
        self.inner.ready_cond.notify_all();

        if state.running_workers > 0 {
            warn!(workers = state.running_workers, "Busy with elemhide selectors, delayed disposing scheduled");
            state.pending_disposal = true;
            state.on_disposed.extend(on_disposed);
            return;
        }

        let mut callbacks = self.dispose_locked(&mut state);
        callbacks.extend(on_disposed);
        drop(state);
        run_callbacks(callbacks);
    }

    /// Registers a running worker; teardown is deferred until the lease is dropped.
    pub fn begin_worker(&self) -> WorkerLease {
        let mut state = self.inner.lifecycle.lock();
        state.running_workers += 1;
        WorkerLease {
            handle: self.clone(),
        }
    }

    fn finish_worker(&self) {
        let mut state = self.inner.lifecycle.lock();
        state.running_workers = state.running_workers.saturating_sub(1);
        if state.running_workers > 0 || !state.pending_disposal {
            return;
        }
        if state.ref_count > 0 {
            state.pending_disposal = false;
            return;
        }

        info!("Elemhide worker completed, running deferred disposal");
        let callbacks = self.dispose_locked(&mut state);
        drop(state);
        run_callbacks(callbacks);
    }

    /// Tears the engine down. Takes the engine lock, so an in-flight query
    /// finishes first.
    fn dispose_locked(&self, state: &mut Lifecycle) -> Vec<DisposeCallback> {
        if let Some(engine) = self.inner.engine.lock().take() {
            drop(engine);
            state.disposals += 1;
            info!("Filter engine disposed");
        }
        state.constructed = false;
        state.ready = false;
        state.pending_disposal = false;
        std::mem::take(&mut state.on_disposed)
    }

    pub fn ref_count(&self) -> usize {
        self.inner.lifecycle.lock().ref_count
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lifecycle.lock().ref_count == 0
    }

    /// Whether an engine instance currently exists, including one kept alive by a
    /// deferred disposal.
    pub fn is_constructed(&self) -> bool {
        self.inner.lifecycle.lock().constructed
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lifecycle.lock().ready
    }

    pub fn has_pending_disposal(&self) -> bool {
        self.inner.lifecycle.lock().pending_disposal
    }

    pub fn running_workers(&self) -> usize {
        self.inner.lifecycle.lock().running_workers
    }

    /// Number of completed teardowns over the handle's lifetime.
    pub fn disposal_count(&self) -> u64 {
        self.inner.lifecycle.lock().disposals
    }

    pub fn same_handle(&self, other: &EngineHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn run_callbacks(callbacks: Vec<DisposeCallback>) {
    for callback in callbacks {
        callback();
    }
}

/// Held by a running elemhide worker. Dropping it is the worker's completion
/// handling for the handle: a disposal requested meanwhile is carried out here.
#[must_use = "dropping the lease immediately ends the worker registration"]
pub struct WorkerLease {
    handle: EngineHandle,
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.handle.finish_worker();
    }
}
