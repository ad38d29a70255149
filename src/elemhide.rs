//! Per-navigation background computation of element hiding selectors.
//!
//! A task runs its query under the engine lock, then publishes exactly one
//! [`ElemhideOutcome`] through its [`CompletionBarrier`]. Cancelling never
//! interrupts the query; it only turns the published outcome into an empty,
//! `Cancelled` one. Dropping the task's [`WorkerLease`] after publishing is what
//! lets a disposal requested in the meantime go through.

use crate::barrier::CompletionBarrier;
use crate::engine::FilterEngine;
use crate::handle::{EngineHandle, WorkerLease};
use crate::referrer::ReferrerGraph;
use crate::sitekey::SiteKeysConfiguration;
use crate::types::EMPTY_SELECTORS_JSON;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Running,
    Finished,
    Cancelled,
}

/// What a task published when it completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElemhideOutcome {
    pub state: TaskState,
    pub selectors: Vec<String>,
}

impl ElemhideOutcome {
    /// JSON array for the script bridge.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.selectors).unwrap_or_else(|e| {
            error!("Failed to encode selectors: {}", e);
            EMPTY_SELECTORS_JSON.to_string()
        })
    }
}

/// Everything a worker needs besides the URL.
#[derive(Clone)]
pub struct WorkerContext {
    pub handle: EngineHandle,
    pub referrers: Arc<ReferrerGraph>,
    pub site_keys: Option<Arc<SiteKeysConfiguration>>,
    pub debug_mode: bool,
}

struct TaskShared {
    id: u64,
    url: String,
    state: Mutex<TaskState>,
    cancel_requested: AtomicBool,
    barrier: CompletionBarrier<ElemhideOutcome>,
}

impl TaskShared {
    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn complete(&self, selectors: Vec<String>) {
        let mut state = self.state.lock();
        if *state != TaskState::Running {
            return;
        }

        let outcome = if self.is_cancelled() {
            warn!(task = self.id, url = %self.url, "Elemhide task cancelled, publishing empty selectors");
            ElemhideOutcome {
                state: TaskState::Cancelled,
                selectors: Vec::new(),
            }
        } else {
            debug!(task = self.id, count = selectors.len(), "Setting elemhide selectors");
            ElemhideOutcome {
                state: TaskState::Finished,
                selectors,
            }
        };
        *state = outcome.state;
        self.barrier.open(outcome);
    }
}

/// Publishes on drop, so the barrier opens and the lease is returned even if the
/// query panics.
struct Completion {
    shared: Arc<TaskShared>,
    selectors: Option<Vec<String>>,
    _lease: WorkerLease,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.shared.complete(self.selectors.take().unwrap_or_default());
    }
}

/// Handle to one navigation's worker. Clones share the same task.
#[derive(Clone)]
pub struct ElemhideTask {
    shared: Arc<TaskShared>,
}

impl std::fmt::Debug for ElemhideTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElemhideTask")
            .field("id", &self.shared.id)
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

impl ElemhideTask {
    /// Registers with the engine handle and starts the worker thread.
    pub fn spawn(url: impl Into<String>, context: WorkerContext) -> Self {
        let shared = Arc::new(TaskShared {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            url: url.into(),
            state: Mutex::new(TaskState::Running),
            cancel_requested: AtomicBool::new(false),
            barrier: CompletionBarrier::new(),
        });

        let mut completion = Completion {
            shared: shared.clone(),
            selectors: None,
            _lease: context.handle.begin_worker(),
        };

        let thread_shared = shared.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("elemhide-{}", shared.id))
            .spawn(move || {
                completion.selectors = Some(compute_selectors(&thread_shared, &context));
                drop(completion);
            });

        // On spawn failure the closure, and with it the completion, is dropped:
        // the task publishes an empty outcome right away.
        if let Err(e) = spawned {
            error!(url = %shared.url, "Could not spawn elemhide thread: {}", e);
        }

        Self { shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> TaskState {
        *self.shared.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Marks the task cancelled unless it already completed. Idempotent.
    pub fn cancel(&self) {
        let state = self.shared.state.lock();
        if *state != TaskState::Running {
            debug!(task = self.shared.id, "Elemhide task already completed, nothing to cancel");
            return;
        }
        if !self.shared.cancel_requested.swap(true, Ordering::SeqCst) {
            warn!(task = self.shared.id, url = %self.shared.url, "Cancelling elemhide task");
        }
    }

    pub fn wait(&self) -> Arc<ElemhideOutcome> {
        self.shared.barrier.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<ElemhideOutcome>> {
        self.shared.barrier.wait_timeout(timeout)
    }

    pub fn outcome(&self) -> Option<Arc<ElemhideOutcome>> {
        self.shared.barrier.try_get()
    }
}

fn compute_selectors(shared: &TaskShared, context: &WorkerContext) -> Vec<String> {
    let url = shared.url.as_str();
    let selectors = context.handle.with_engine(|engine| {
        if shared.is_cancelled() {
            debug!(task = shared.id, "Cancelled before querying the engine");
            return Vec::new();
        }

        let mut referrer_chain = context.referrers.chain_for(url);
        referrer_chain.push(url.to_string());

        if context.debug_mode {
            log_subscriptions(engine);
        }

        let Some(domain) = engine.host_from_url(url) else {
            error!(%url, "Failed to extract domain");
            return Vec::new();
        };

        let site_key = context
            .site_keys
            .as_ref()
            .and_then(|site_keys| site_keys.site_key_for(&referrer_chain));

        debug!(task = shared.id, %url, %domain, "Requesting elemhide selectors");
        let selectors = engine.element_hiding_selectors(url, &domain, &referrer_chain, site_key.as_deref());
        debug!(task = shared.id, count = selectors.len(), "Finished requesting elemhide selectors");
        selectors
    });

    selectors.unwrap_or_else(|| {
        warn!(%url, "Filter engine already disposed, no elemhide selectors");
        Vec::new()
    })
}

fn log_subscriptions(engine: &dyn FilterEngine) {
    let subscriptions = engine.subscriptions();
    debug!("Listed subscriptions: {}", subscriptions.len());
    for subscription in subscriptions {
        debug!(
            "Subscribed to {} {} ({} rules)",
            if subscription.disabled { "disabled" } else { "enabled" },
            subscription.title,
            subscription.rule_count
        );
    }
}
