//! Query surface of the filtering engine and the adblock-backed implementation.
//!
//! Everything here is called with the [`EngineHandle`](crate::handle::EngineHandle)
//! lock held; implementations never need their own synchronization.

use crate::config::FilterConfig;
use crate::content_type::ContentType;
use crate::filters::FilterManager;

use adblock::{Engine, FilterSet, request::Request};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, error, info};
use url::Url;

/// A filter list known to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub title: String,
    pub rule_count: usize,
    pub disabled: bool,
}

/// The queries the coordination layer makes against a filtering engine.
///
/// `referrer_chain` is root first, nearest ancestor last. A `None` site key means
/// the unkeyed form of the query.
pub trait FilterEngine: Send {
    fn is_domain_whitelisted(&self, url: &str, referrer_chain: &[String], site_key: Option<&str>) -> bool;

    fn is_document_whitelisted(&self, url: &str, referrer_chain: &[String], site_key: Option<&str>) -> bool;

    /// `true` when the request should be blocked.
    fn matches(
        &self,
        url: &str,
        content_type: ContentType,
        referrer_chain: &[String],
        site_key: Option<&str>,
    ) -> bool;

    fn element_hiding_selectors(
        &self,
        url: &str,
        domain: &str,
        referrer_chain: &[String],
        site_key: Option<&str>,
    ) -> Vec<String>;

    fn host_from_url(&self, url: &str) -> Option<String> {
        Url::parse(url).ok()?.host_str().map(str::to_string)
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        Vec::new()
    }
}

/// Builds engines for an [`EngineHandle`](crate::handle::EngineHandle).
///
/// Called on a background thread, without the engine lock held.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn FilterEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn FilterEngine>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn FilterEngine>> {
        self()
    }
}

/// [`FilterEngine`] over `adblock::Engine`.
///
/// adblock has no notion of site keys, so keyed queries run in their unkeyed form.
pub struct AdblockEngine {
    engine: Engine,
    whitelist_domains: HashSet<String>,
    subscriptions: Vec<Subscription>,
}

impl AdblockEngine {
    pub fn from_config(config: &FilterConfig) -> Result<Self> {
        let mut filter_manager = FilterManager::new();
        let mut filter_set = FilterSet::new(config.debug_mode);
        let mut subscriptions = Vec::new();

        for path in &config.filter_lists {
            let title = path.display().to_string();
            match filter_manager.load_filters(path) {
                Ok(rules) => {
                    filter_set.add_filters(&rules, Default::default());
                    subscriptions.push(Subscription {
                        title,
                        rule_count: rules.len(),
                        disabled: false,
                    });
                }
                Err(e) => {
                    error!(list = %title, "Could not load filter list: {:#}", e);
                    subscriptions.push(Subscription {
                        title,
                        rule_count: 0,
                        disabled: true,
                    });
                }
            }
        }

        if !config.filter_rules.is_empty() {
            filter_set.add_filters(&config.filter_rules, Default::default());
            subscriptions.push(Subscription {
                title: "custom rules".to_string(),
                rule_count: config.filter_rules.len(),
                disabled: false,
            });
        }

        let engine = Engine::from_filter_set(filter_set, true);
        let whitelist_domains = config
            .whitelist_domains
            .iter()
            .map(|d| d.trim_start_matches('.').to_lowercase())
            .collect();

        info!(lists = subscriptions.len(), "Filter engine constructed");
        Ok(Self {
            engine,
            whitelist_domains,
            subscriptions,
        })
    }

    fn host_is_whitelisted(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
            return false;
        };
        self.whitelist_domains.iter().any(|domain| {
            host == *domain
                || (host.len() > domain.len()
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
        })
    }
}

impl FilterEngine for AdblockEngine {
    fn is_domain_whitelisted(&self, url: &str, referrer_chain: &[String], _site_key: Option<&str>) -> bool {
        self.host_is_whitelisted(url) || referrer_chain.iter().any(|parent| self.host_is_whitelisted(parent))
    }

    fn is_document_whitelisted(&self, url: &str, referrer_chain: &[String], _site_key: Option<&str>) -> bool {
        // Every document in the frame hierarchy, checked against its own parent.
        let documents: Vec<&str> = if referrer_chain.is_empty() {
            vec![url]
        } else {
            referrer_chain.iter().map(String::as_str).collect()
        };

        documents.iter().enumerate().any(|(i, document)| {
            let source = if i == 0 { document } else { documents[i - 1] };
            match Request::new(document, source, ContentType::Document.as_request_type()) {
                Ok(request) => self
                    .engine
                    .check_network_request_subset(&request, false, true)
                    .exception
                    .is_some(),
                Err(e) => {
                    debug!(url = %document, "Unparseable document url: {:?}", e);
                    false
                }
            }
        })
    }

    fn matches(
        &self,
        url: &str,
        content_type: ContentType,
        referrer_chain: &[String],
        _site_key: Option<&str>,
    ) -> bool {
        let source_url = referrer_chain.last().map(String::as_str).unwrap_or("");
        match Request::new(url, source_url, content_type.as_request_type()) {
            Ok(request) => {
                let result = self.engine.check_network_request(&request);
                if let Some(filter) = result.filter.as_deref().filter(|_| result.matched) {
                    debug!(%url, %filter, "Matched network filter");
                }
                result.matched
            }
            Err(e) => {
                debug!(%url, "Unparseable request url: {:?}", e);
                false
            }
        }
    }

    fn element_hiding_selectors(
        &self,
        url: &str,
        _domain: &str,
        _referrer_chain: &[String],
        _site_key: Option<&str>,
    ) -> Vec<String> {
        let resources = self.engine.url_cosmetic_resources(url);
        let mut selectors: Vec<String> = resources.hide_selectors.into_iter().collect();
        selectors.sort();
        selectors
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.clone()
    }
}

/// Creates [`AdblockEngine`]s from a fixed configuration.
#[derive(Debug, Clone)]
pub struct AdblockEngineFactory {
    config: FilterConfig,
}

impl AdblockEngineFactory {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for AdblockEngineFactory {
    fn create(&self) -> Result<Box<dyn FilterEngine>> {
        Ok(Box::new(AdblockEngine::from_config(&self.config)?))
    }
}
