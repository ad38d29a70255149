//! The host-facing surface of a filtered web view.
//!
//! [`WebViewFilter`] is what the embedding browser talks to: it gets told about
//! page starts and stops, every resource load, and selector requests coming from
//! the injected script. It owns this view's share of the engine handle and
//! coordinates its teardown with the running elemhide worker.

use crate::config::FilterConfig;
use crate::content_type::ContentTypeDetector;
use crate::elemhide::{ElemhideTask, WorkerContext};
use crate::engine::AdblockEngineFactory;
use crate::handle::{DisposeCallback, EngineHandle};
use crate::http::ReqwestHttpClient;
use crate::interceptor::InterceptionPipeline;
use crate::referrer::ReferrerGraph;
use crate::sitekey::{SignatureVerifier, SiteKeysConfiguration};
use crate::types::{EMPTY_SELECTORS_JSON, FilterStats, FilterStatsSnapshot, Interception, ResourceRequest};

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

pub struct WebViewFilter {
    config: FilterConfig,
    handle: Mutex<Option<EngineHandle>>,
    referrers: Arc<ReferrerGraph>,
    site_keys: Option<Arc<SiteKeysConfiguration>>,
    pipeline: InterceptionPipeline,
    stats: Arc<FilterStats>,
    current: Mutex<Option<ElemhideTask>>,
    loading: AtomicBool,
    enabled: AtomicBool,
    // Set by `set_engine_handle(None)`; no engine is built until a handle is attached.
    detached: AtomicBool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for WebViewFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handle = self.engine_handle();
        let current = self.current_task();
        f.debug_struct("WebViewFilter")
            .field("handle", &handle)
            .field("current", &current)
            .field("loading", &self.is_loading())
            .field("enabled", &self.is_adblock_enabled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl WebViewFilter {
    /// The engine is created from `config` on the first page start.
    pub fn new(config: FilterConfig) -> Result<Self> {
        Self::build(config, None, None)
    }

    /// Shares an existing engine handle. The view acquires it right away and
    /// releases it on [`dispose`](Self::dispose).
    pub fn with_handle(config: FilterConfig, handle: EngineHandle) -> Result<Self> {
        handle.acquire();
        Self::build(config, Some(handle), None)
    }

    /// Enables signed header verification with an explicit configuration.
    pub fn with_site_keys(
        config: FilterConfig,
        handle: Option<EngineHandle>,
        site_keys: Arc<SiteKeysConfiguration>,
    ) -> Result<Self> {
        if let Some(handle) = &handle {
            handle.acquire();
        }
        Self::build(config, handle, Some(site_keys))
    }

    /// Enables signed header verification over reqwest, set up from
    /// `config.site_keys`. Without those settings headers are not checked.
    pub fn with_signature_verifier(config: FilterConfig, signatures: Arc<dyn SignatureVerifier>) -> Result<Self> {
        let site_keys = match &config.site_keys {
            Some(settings) => {
                let client = ReqwestHttpClient::new(settings)?;
                Some(Arc::new(SiteKeysConfiguration::new(Arc::new(client), signatures)))
            }
            None => {
                warn!("No site key settings, signed headers will not be checked");
                None
            }
        };
        Self::build(config, None, site_keys)
    }

    fn build(
        config: FilterConfig,
        handle: Option<EngineHandle>,
        site_keys: Option<Arc<SiteKeysConfiguration>>,
    ) -> Result<Self> {
        let referrers = Arc::new(ReferrerGraph::new());
        let stats = Arc::new(FilterStats::default());
        let pipeline = InterceptionPipeline::new(
            referrers.clone(),
            ContentTypeDetector::new()?,
            site_keys.clone(),
            stats.clone(),
        );

        Ok(Self {
            config,
            handle: Mutex::new(handle),
            referrers,
            site_keys,
            pipeline,
            stats,
            current: Mutex::new(None),
            loading: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    fn ensure_handle(&self) -> Option<EngineHandle> {
        if self.is_disposed() {
            return None;
        }
        let mut slot = self.handle.lock();
        if slot.is_none() && !self.detached.load(Ordering::SeqCst) {
            info!("Creating filter engine");
            let handle = EngineHandle::new(AdblockEngineFactory::new(self.config.clone()));
            handle.acquire();
            *slot = Some(handle);
        }
        slot.clone()
    }

    /// New navigation: drops the previous page's referrers, cancels its worker and
    /// starts computing selectors for `url`.
    pub fn on_page_started(&self, url: &str) {
        info!(%url, "Start loading");
        self.loading.store(true, Ordering::SeqCst);
        self.referrers.reset();

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            previous.cancel();
        }

        if !self.is_adblock_enabled() {
            debug!(%url, "Adblock disabled, no elemhide selectors");
            return;
        }
        let Some(handle) = self.ensure_handle() else {
            warn!(%url, "No filter engine, no elemhide selectors");
            return;
        };

        let task = ElemhideTask::spawn(
            url,
            WorkerContext {
                handle,
                referrers: self.referrers.clone(),
                site_keys: self.site_keys.clone(),
                debug_mode: self.config.debug_mode,
            },
        );
        debug!(task = task.id(), %url, "Started elemhide task");
        *current = Some(task);
    }

    pub fn on_page_finished(&self, url: &str) {
        info!(%url, "Finished loading");
        self.loading.store(false, Ordering::SeqCst);
    }

    /// The host failed to load the page. Its selectors are no longer wanted.
    pub fn on_received_error(&self, url: &str, code: i32, description: &str) {
        error!(%url, code, %description, "Load error");
        self.stop_loading();
    }

    /// Stops the page, forgets its referrers and cancels its worker. The cancelled
    /// task stays current, so bridge readers get an empty list.
    pub fn stop_loading(&self) {
        self.loading.store(false, Ordering::SeqCst);
        self.referrers.reset();
        if let Some(task) = self.current.lock().as_ref() {
            task.cancel();
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Resource load callback. Never fails: anything unexpected lets the host load
    /// the resource itself.
    pub fn intercept(&self, request: &ResourceRequest) -> Interception {
        if !self.is_adblock_enabled() {
            debug!(url = %request.url, "Adblock disabled, allow loading");
            return self.pipeline.intercept(None, request);
        }
        let handle = self.handle.lock().clone();
        self.pipeline.intercept(handle.as_ref(), request)
    }

    /// Script bridge call: JSON array of the current page's hiding selectors.
    /// Blocks until the worker publishes, or for at most the configured timeout.
    pub fn elemhide_selectors(&self) -> String {
        let Some(task) = self.current.lock().clone() else {
            warn!("No elemhide task, returning empty selectors");
            return EMPTY_SELECTORS_JSON.to_string();
        };

        debug!(task = task.id(), "Waiting for elemhide selectors");
        let outcome = match self.config.bridge_timeout() {
            Some(timeout) => task.wait_timeout(timeout),
            None => Some(task.wait()),
        };
        match outcome {
            Some(outcome) => outcome.to_json(),
            None => {
                warn!(task = task.id(), "Interrupted waiting for elemhide selectors");
                EMPTY_SELECTORS_JSON.to_string()
            }
        }
    }

    /// Detaches from the engine. `on_disposed` runs once this view's teardown has
    /// happened, which waits for a running elemhide worker to complete.
    pub fn dispose(&self, on_disposed: Option<DisposeCallback>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            warn!("Filter already disposed");
            if let Some(callback) = on_disposed {
                callback();
            }
            return;
        }

        info!("Disposing filter");
        self.stop_loading();
        match self.handle.lock().take() {
            Some(handle) => handle.release_then(on_disposed),
            None => {
                if let Some(callback) = on_disposed {
                    callback();
                }
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Switches to another engine handle, or detaches with `None`. The previous
    /// handle is released after the new one is acquired. A detached view passes
    /// everything through and builds no engine of its own until a handle is
    /// attached again.
    pub fn set_engine_handle(&self, handle: Option<EngineHandle>) {
        if self.is_disposed() {
            warn!("Filter already disposed, ignoring engine handle");
            return;
        }
        if let Some(handle) = &handle {
            handle.acquire();
        }
        self.detached.store(handle.is_none(), Ordering::SeqCst);
        let previous = std::mem::replace(&mut *self.handle.lock(), handle);
        if let Some(previous) = previous {
            debug!("Releasing previous engine handle");
            previous.release();
        }
    }

    pub fn engine_handle(&self) -> Option<EngineHandle> {
        self.handle.lock().clone()
    }

    pub fn set_adblock_enabled(&self, enabled: bool) {
        info!(enabled, "Adblock toggled");
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_adblock_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn current_task(&self) -> Option<ElemhideTask> {
        self.current.lock().clone()
    }

    pub fn referrers(&self) -> &ReferrerGraph {
        &self.referrers
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn stats(&self) -> FilterStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for WebViewFilter {
    fn drop(&mut self) {
        if !self.is_disposed() {
            debug!("Filter dropped without dispose, releasing engine");
            self.dispose(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::ContentType;
    use crate::elemhide::TaskState;
    use crate::engine::FilterEngine;
    use std::sync::atomic::AtomicUsize;

    struct StaticEngine;

    impl FilterEngine for StaticEngine {
        fn is_domain_whitelisted(&self, _: &str, _: &[String], _: Option<&str>) -> bool {
            false
        }
        fn is_document_whitelisted(&self, _: &str, _: &[String], _: Option<&str>) -> bool {
            false
        }
        fn matches(&self, url: &str, _: ContentType, _: &[String], _: Option<&str>) -> bool {
            url.contains("ads")
        }
        fn element_hiding_selectors(&self, _: &str, _: &str, _: &[String], _: Option<&str>) -> Vec<String> {
            vec![".ad".to_string()]
        }
    }

    fn static_handle() -> EngineHandle {
        EngineHandle::new(|| -> Result<Box<dyn FilterEngine>> { Ok(Box::new(StaticEngine)) })
    }

    #[test]
    fn no_task_means_empty_selectors() {
        let filter = WebViewFilter::with_handle(FilterConfig::minimal(), static_handle()).unwrap();
        assert_eq!(filter.elemhide_selectors(), "[]");
    }

    #[test]
    fn page_lifecycle() {
        let filter = WebViewFilter::with_handle(FilterConfig::minimal(), static_handle()).unwrap();
        filter.on_page_started("https://a.test/");
        assert!(filter.is_loading());
        assert_eq!(filter.elemhide_selectors(), r#"[".ad"]"#);
        filter.on_page_finished("https://a.test/");
        assert!(!filter.is_loading());
        assert_eq!(filter.current_task().unwrap().state(), TaskState::Finished);
    }

    #[test]
    fn disabled_filter_passes_through() {
        let filter = WebViewFilter::with_handle(FilterConfig::minimal(), static_handle()).unwrap();
        filter.set_adblock_enabled(false);
        filter.on_page_started("https://a.test/");
        assert!(filter.current_task().is_none());
        assert!(filter.intercept(&ResourceRequest::get("https://ads.test/x.js")).is_default());
        assert_eq!(filter.stats().passed_through, 1);

        filter.set_adblock_enabled(true);
        assert!(filter.intercept(&ResourceRequest::get("https://ads.test/x.js")).is_block());
    }

    #[test]
    fn dispose_twice_runs_both_callbacks() {
        let handle = static_handle();
        let filter = WebViewFilter::with_handle(FilterConfig::minimal(), handle.clone()).unwrap();
        assert!(handle.wait_until_ready());

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            filter.dispose(Some(Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(handle.is_disposed());
        assert!(filter.engine_handle().is_none());
        assert!(filter.intercept(&ResourceRequest::get("https://ads.test/x.js")).is_default());
    }

    #[test]
    fn detached_view_builds_no_engine() {
        let handle = static_handle();
        let filter = WebViewFilter::with_handle(FilterConfig::minimal(), handle.clone()).unwrap();
        filter.set_engine_handle(None);
        assert!(handle.is_disposed());

        filter.on_page_started("https://a.test/");
        assert!(filter.engine_handle().is_none());
        assert!(filter.current_task().is_none());
        assert_eq!(filter.elemhide_selectors(), "[]");
        assert!(filter.intercept(&ResourceRequest::get("https://ads.test/x.js")).is_default());

        filter.set_engine_handle(Some(handle.clone()));
        filter.on_page_started("https://a.test/");
        assert_eq!(filter.elemhide_selectors(), r#"[".ad"]"#);
    }

    #[test]
    fn stop_loading_forgets_referrers() {
        let filter = WebViewFilter::with_handle(FilterConfig::minimal(), static_handle()).unwrap();
        filter.on_page_started("https://a.test/");
        filter.intercept(&ResourceRequest::get("https://cdn.test/y.js").with_referrer("https://a.test/"));
        assert_eq!(filter.referrers().len(), 1);

        filter.stop_loading();
        assert!(filter.referrers().is_empty());
        assert!(!filter.is_loading());
    }

    #[test]
    fn drop_releases_handle() {
        let handle = static_handle();
        {
            let _filter = WebViewFilter::with_handle(FilterConfig::minimal(), handle.clone()).unwrap();
            assert_eq!(handle.ref_count(), 1);
        }
        assert_eq!(handle.ref_count(), 0);
    }

    #[test]
    fn bridge_timeout_returns_empty() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let handle = static_handle();
        let mut config = FilterConfig::minimal();
        config.bridge_timeout_ms = Some(20);
        let filter = WebViewFilter::with_handle(config, handle.clone()).unwrap();

        // Hold the engine lock so the worker cannot finish.
        let blocker = handle.clone();
        let holder = std::thread::spawn(move || {
            blocker.with_engine(|_| {
                entered_tx.send(()).ok();
                release_rx.recv().ok();
            });
        });
        entered_rx.recv().unwrap();

        filter.on_page_started("https://a.test/");
        assert_eq!(filter.elemhide_selectors(), "[]");
        release_tx.send(()).unwrap();
        holder.join().unwrap();
        assert_eq!(filter.current_task().unwrap().wait().state, TaskState::Finished);
    }
}
