#![allow(dead_code)]

use adblock_webview::error::HttpError;
use adblock_webview::http::{HttpClient, HttpRequest, ServerResponse};
use adblock_webview::sitekey::SignatureVerifier;
use adblock_webview::{ContentType, EngineHandle, FilterEngine};

use anyhow::Result;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// One `matches` call as the engine saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchQuery {
    pub url: String,
    pub content_type: ContentType,
    pub referrer_chain: Vec<String>,
    pub site_key: Option<String>,
}

/// What the scripted engine answers.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// URLs containing any of these are blocked, for the listed content types
    /// only when `blocked_types` is non-empty.
    pub blocked: Vec<String>,
    pub blocked_types: Vec<ContentType>,
    pub whitelisted_domains: Vec<String>,
    /// Chains containing any of these URLs are document-whitelisted.
    pub whitelisted_documents: Vec<String>,
    pub selectors: Vec<String>,
}

impl Script {
    pub fn blocking(patterns: &[&str]) -> Self {
        Self {
            blocked: patterns.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_selectors(mut self, selectors: &[&str]) -> Self {
        self.selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Lets a test hold the elemhide worker inside its query, with the engine lock held.
pub struct Gate {
    entered: Receiver<String>,
    release: Sender<()>,
}

impl Gate {
    /// URL of the navigation whose worker entered the query.
    pub fn entered(&self) -> String {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("worker never entered the selector query")
    }

    pub fn release(&self) {
        self.release.send(()).expect("gated engine is gone");
    }
}

struct GateEnds {
    entered: Sender<String>,
    release: Arc<Mutex<Receiver<()>>>,
}

pub struct ScriptedEngine {
    script: Script,
    gate: Option<GateEnds>,
    queries: Arc<Mutex<Vec<MatchQuery>>>,
}

impl FilterEngine for ScriptedEngine {
    fn is_domain_whitelisted(&self, url: &str, _referrer_chain: &[String], _site_key: Option<&str>) -> bool {
        self.host_from_url(url)
            .is_some_and(|host| self.script.whitelisted_domains.contains(&host))
    }

    fn is_document_whitelisted(&self, _url: &str, referrer_chain: &[String], _site_key: Option<&str>) -> bool {
        referrer_chain
            .iter()
            .any(|parent| self.script.whitelisted_documents.contains(parent))
    }

    fn matches(&self, url: &str, content_type: ContentType, referrer_chain: &[String], site_key: Option<&str>) -> bool {
        self.queries.lock().push(MatchQuery {
            url: url.to_string(),
            content_type,
            referrer_chain: referrer_chain.to_vec(),
            site_key: site_key.map(str::to_string),
        });
        let type_matches = self.script.blocked_types.is_empty() || self.script.blocked_types.contains(&content_type);
        type_matches && self.script.blocked.iter().any(|pattern| url.contains(pattern.as_str()))
    }

    fn element_hiding_selectors(
        &self,
        url: &str,
        _domain: &str,
        _referrer_chain: &[String],
        _site_key: Option<&str>,
    ) -> Vec<String> {
        if let Some(gate) = &self.gate {
            gate.entered.send(url.to_string()).ok();
            gate.release.lock().recv().ok();
        }
        self.script.selectors.clone()
    }
}

/// Handle over a [`ScriptedEngine`], plus the log of its `matches` calls.
pub struct Scripted {
    pub handle: EngineHandle,
    pub queries: Arc<Mutex<Vec<MatchQuery>>>,
}

pub fn scripted(script: Script) -> Scripted {
    build(script, None)
}

pub fn gated(script: Script) -> (Scripted, Gate) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let scripted = build(
        script,
        Some((entered_tx, Arc::new(Mutex::new(release_rx)))),
    );
    (
        scripted,
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

fn build(script: Script, gate: Option<(Sender<String>, Arc<Mutex<Receiver<()>>>)>) -> Scripted {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let log = queries.clone();
    let handle = EngineHandle::new(move || -> Result<Box<dyn FilterEngine>> {
        Ok(Box::new(ScriptedEngine {
            script: script.clone(),
            gate: gate.as_ref().map(|(entered, release)| GateEnds {
                entered: entered.clone(),
                release: release.clone(),
            }),
            queries: log.clone(),
        }))
    });
    Scripted { handle, queries }
}

/// Canned responses by URL. Unknown URLs fail like a transport error.
#[derive(Default)]
pub struct FakeHttpClient {
    responses: Mutex<HashMap<String, ServerResponse>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttpClient {
    pub fn respond(&self, url: &str, response: ServerResponse) {
        self.responses.lock().insert(url.to_string(), response);
    }
}

impl HttpClient for FakeHttpClient {
    fn request(&self, request: &HttpRequest) -> Result<ServerResponse, HttpError> {
        self.requests.lock().push(request.clone());
        self.responses.lock().get(&request.url).cloned().ok_or_else(|| {
            HttpError::Runtime(std::io::Error::new(std::io::ErrorKind::NotFound, "no scripted response"))
        })
    }
}

pub const VALID_SIGNATURE: &[u8] = b"valid-signature";

/// Accepts exactly [`VALID_SIGNATURE`], whatever the key and data.
pub struct FakeVerifier {
    pub seen_data: Mutex<Vec<Vec<u8>>>,
}

impl FakeVerifier {
    pub fn new() -> Self {
        Self {
            seen_data: Mutex::new(Vec::new()),
        }
    }
}

impl SignatureVerifier for FakeVerifier {
    fn verify(&self, _public_key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        self.seen_data.lock().push(data.to_vec());
        signature == VALID_SIGNATURE
    }
}

pub fn ok_response(content_type: &str, body: &str) -> ServerResponse {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
    ServerResponse {
        status: StatusCode::OK,
        headers,
        body: Some(Bytes::from(body.to_string())),
        final_url: None,
    }
}

pub fn redirect_response(location: &str) -> ServerResponse {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::LOCATION, HeaderValue::from_str(location).unwrap());
    ServerResponse {
        status: StatusCode::FOUND,
        headers,
        body: None,
        final_url: None,
    }
}

pub fn chain(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}
