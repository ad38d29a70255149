use crate::content_type::ContentType;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, REFERER, USER_AGENT};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Bridge value when there are no selectors.
pub const EMPTY_SELECTORS_JSON: &str = "[]";

pub const HEADER_REQUESTED_WITH: &str = "x-requested-with";
pub const HEADER_REQUESTED_WITH_XMLHTTPREQUEST: &str = "XMLHttpRequest";

/// A resource load reported by the host.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub url: String,
    pub is_main_frame: bool,
    pub is_xml_http_request: bool,
    pub method: String,
    pub headers: HeaderMap,
}

impl ResourceRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            is_main_frame: false,
            is_xml_http_request: false,
            method: "GET".to_string(),
            headers: HeaderMap::new(),
        }
    }

    pub fn main_frame(mut self) -> Self {
        self.is_main_frame = true;
        self
    }

    pub fn xml_http_request(mut self) -> Self {
        self.is_xml_http_request = true;
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Adds a host-supplied header. Names or values `http` rejects are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(%name, "Dropping invalid request header"),
        }
        self
    }

    pub fn with_referrer(self, referrer: &str) -> Self {
        self.with_header(REFERER.as_str(), referrer)
    }

    pub fn referrer(&self) -> Option<&str> {
        self.header(REFERER.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(USER_AGENT.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Flagged by the host, or marked by the `X-Requested-With` header.
    pub fn is_xhr(&self) -> bool {
        self.is_xml_http_request || self.header(HEADER_REQUESTED_WITH) == Some(HEADER_REQUESTED_WITH_XMLHTTPREQUEST)
    }
}

/// Outcome of the filtering queries for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    MainFrame,
    DomainWhitelisted,
    DocumentWhitelisted,
    Allowed(ContentType),
    Blocked(ContentType),
}

/// What the host should do with a resource load.
#[derive(Debug, Clone)]
pub enum Interception {
    /// No decision: the host loads the resource itself.
    Default,
    Block(BlockResponse),
    Respond(FetchedResponse),
    /// Stop the current load and load this URL instead.
    Reload(String),
}

impl Interception {
    pub fn is_block(&self) -> bool {
        matches!(self, Interception::Block(_))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Interception::Default)
    }
}

/// Empty response the host turns into a failed sub-resource load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResponse {
    pub mime_type: &'static str,
    pub encoding: &'static str,
    pub body: Bytes,
}

impl Default for BlockResponse {
    fn default() -> Self {
        Self {
            mime_type: "text/plain",
            encoding: "UTF-8",
            body: Bytes::new(),
        }
    }
}

/// A response fetched out of band and handed to the host as the load's content.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub url: String,
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Counters kept by the interception pipeline
#[derive(Debug, Default)]
pub struct FilterStats {
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    whitelisted_requests: AtomicU64,
    allowed_requests: AtomicU64,
    main_frame_requests: AtomicU64,
    passed_through: AtomicU64,
}

/// Point-in-time copy of [`FilterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStatsSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub whitelisted_requests: u64,
    pub allowed_requests: u64,
    pub main_frame_requests: u64,
    /// Requests let through without a decision because filtering was unavailable.
    pub passed_through: u64,
}

impl FilterStats {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, decision: &Decision) {
        let counter = match decision {
            Decision::MainFrame => &self.main_frame_requests,
            Decision::DomainWhitelisted | Decision::DocumentWhitelisted => &self.whitelisted_requests,
            Decision::Allowed(_) => &self.allowed_requests,
            Decision::Blocked(_) => &self.blocked_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_through(&self) {
        self.passed_through.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FilterStatsSnapshot {
        FilterStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            whitelisted_requests: self.whitelisted_requests.load(Ordering::Relaxed),
            allowed_requests: self.allowed_requests.load(Ordering::Relaxed),
            main_frame_requests: self.main_frame_requests.load(Ordering::Relaxed),
            passed_through: self.passed_through.load(Ordering::Relaxed),
        }
    }
}

impl FilterStatsSnapshot {
    pub fn block_percentage(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.blocked_requests as f64 / self.total_requests as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xhr_from_flag_or_header() {
        assert!(ResourceRequest::get("https://a.test/api").xml_http_request().is_xhr());
        assert!(
            ResourceRequest::get("https://a.test/api")
                .with_header("X-Requested-With", "XMLHttpRequest")
                .is_xhr()
        );
        assert!(!ResourceRequest::get("https://a.test/api").is_xhr());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let request = ResourceRequest::get("https://ads.test/x.js")
            .with_header("Referer", "https://a.test/")
            .with_header("User-Agent", "UA");
        assert_eq!(request.referrer(), Some("https://a.test/"));
        assert_eq!(request.user_agent(), Some("UA"));
    }

    #[test]
    fn invalid_headers_are_dropped() {
        let request = ResourceRequest::get("https://a.test/").with_header("bad header", "x");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn stats_snapshot() {
        let stats = FilterStats::default();
        for decision in [Decision::Blocked(ContentType::Script), Decision::Allowed(ContentType::Image)] {
            stats.record_request();
            stats.record_decision(&decision);
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.blocked_requests, 1);
        assert_eq!(snapshot.block_percentage(), 50.0);
    }
}
