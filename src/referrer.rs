use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Per-navigation map from resource URL to the URL that referred it.
///
/// Safe to share between interception threads and the elemhide worker without
/// any outside locking.
#[derive(Debug, Default)]
pub struct ReferrerGraph {
    parents: DashMap<String, String>,
}

impl ReferrerGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous page's graph.
    pub fn reset(&self) {
        debug!(entries = self.parents.len(), "Clearing referrers");
        self.parents.clear();
    }

    /// Store `parent_url` as the referrer of `child_url`. A resource reported as its
    /// own referrer is ignored.
    pub fn record(&self, child_url: &str, parent_url: &str) {
        if child_url == parent_url {
            warn!(url = %child_url, "Referrer is the same as url, skipping");
            return;
        }
        self.parents.insert(child_url.to_string(), parent_url.to_string());
    }

    pub fn parent_of(&self, url: &str) -> Option<String> {
        self.parents.get(url).map(|entry| entry.value().clone())
    }

    /// Ancestors of `leaf_url`, root first and nearest referrer last. The walk stops
    /// at the first URL already collected, so cyclic graphs yield a partial chain.
    pub fn chain_for(&self, leaf_url: &str) -> Vec<String> {
        let mut chain: VecDeque<String> = VecDeque::new();
        let mut current = leaf_url.to_string();
        while let Some(parent) = self.parent_of(&current) {
            if chain.contains(&parent) {
                warn!(url = %leaf_url, "Detected referrer loop, finished creating referrers list");
                break;
            }
            chain.push_front(parent.clone());
            current = parent;
        }
        chain.into()
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}
