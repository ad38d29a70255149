use crate::content_type::{ContentType, ContentTypeDetector};
use crate::engine::FilterEngine;
use crate::handle::EngineHandle;
use crate::http::{self, HttpRequest};
use crate::referrer::ReferrerGraph;
use crate::sitekey::{HEADER_SITEKEY, SiteKeysConfiguration};
use crate::types::{BlockResponse, Decision, FetchedResponse, FilterStats, Interception, ResourceRequest};

use ::http::Method;
use ::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Per-request decision procedure shared by all host threads.
pub struct InterceptionPipeline {
    referrers: Arc<ReferrerGraph>,
    detector: ContentTypeDetector,
    site_keys: Option<Arc<SiteKeysConfiguration>>,
    stats: Arc<FilterStats>,
}

impl InterceptionPipeline {
    pub fn new(
        referrers: Arc<ReferrerGraph>,
        detector: ContentTypeDetector,
        site_keys: Option<Arc<SiteKeysConfiguration>>,
        stats: Arc<FilterStats>,
    ) -> Self {
        Self {
            referrers,
            detector,
            site_keys,
            stats,
        }
    }

    /// Decides one resource load. Engine queries run under the engine lock; the
    /// out-of-band fetch for site key verification runs after it is released.
    pub fn intercept(&self, handle: Option<&EngineHandle>, request: &ResourceRequest) -> Interception {
        self.stats.record_request();
        let url = request.url.as_str();

        match request.referrer() {
            Some(referrer) => {
                debug!(%url, %referrer, "Header referrer");
                self.referrers.record(url, referrer);
            }
            None => debug!(%url, "No referrer header"),
        }
        let referrer_chain = self.referrers.chain_for(url);

        let Some(handle) = handle else {
            self.stats.record_pass_through();
            return Interception::Default;
        };

        let Some(decision) = handle.with_engine(|engine| self.decide(engine, request, &referrer_chain)) else {
            warn!(%url, "Filter engine already disposed, allow loading");
            self.stats.record_pass_through();
            return Interception::Default;
        };
        self.stats.record_decision(&decision);

        match decision {
            Decision::Blocked(content_type) => {
                warn!(%url, ?content_type, "Blocked loading");
                Interception::Block(BlockResponse::default())
            }
            Decision::MainFrame => {
                warn!(%url, "Main frame, allow loading");
                self.fetch_and_check_site_key(request)
            }
            Decision::DomainWhitelisted => {
                warn!(%url, "Domain is whitelisted, allow loading");
                self.fetch_and_check_site_key(request)
            }
            Decision::DocumentWhitelisted => {
                warn!(%url, "Document is whitelisted, allow loading");
                self.fetch_and_check_site_key(request)
            }
            Decision::Allowed(_) => {
                debug!(%url, "Allowed loading");
                self.fetch_and_check_site_key(request)
            }
        }
    }

    /// Runs with the engine lock held.
    pub fn decide(&self, engine: &dyn FilterEngine, request: &ResourceRequest, referrer_chain: &[String]) -> Decision {
        if request.is_main_frame {
            return Decision::MainFrame;
        }

        let url = request.url.as_str();
        let site_key = self.site_key_for(referrer_chain);
        let site_key = site_key.as_deref();

        if engine.is_domain_whitelisted(url, referrer_chain, site_key) {
            return Decision::DomainWhitelisted;
        }
        if engine.is_document_whitelisted(url, referrer_chain, site_key) {
            return Decision::DocumentWhitelisted;
        }

        let content_type = if request.is_xhr() {
            ContentType::XmlHttpRequest
        } else {
            self.detector.detect(url).unwrap_or(ContentType::Other)
        };

        if engine.matches(url, content_type, referrer_chain, site_key) {
            Decision::Blocked(content_type)
        } else {
            Decision::Allowed(content_type)
        }
    }

    fn site_key_for(&self, referrer_chain: &[String]) -> Option<String> {
        self.site_keys
            .as_ref()
            .and_then(|site_keys| site_keys.site_key_for(referrer_chain))
    }

    fn fetch_and_check_site_key(&self, request: &ResourceRequest) -> Interception {
        let Some(site_keys) = self.site_keys.as_ref() else {
            return Interception::Default;
        };

        let method = match http::parse_method(&request.method) {
            Ok(method) if method == Method::GET || method == Method::POST => method,
            Ok(_) => return Interception::Default,
            Err(e) => {
                error!(url = %request.url, "{}", e);
                return Interception::Default;
            }
        };

        // Main frame redirects are handed back to the host instead of being followed.
        let http_request = HttpRequest {
            url: request.url.clone(),
            method,
            headers: request.headers.clone(),
            follow_redirects: !request.is_main_frame,
        };
        let response = match site_keys.http_client().request(&http_request) {
            Ok(response) => response,
            Err(e) => {
                error!(url = %request.url, "WebRequest failed: {}", e);
                return Interception::Default;
            }
        };

        if http::is_redirect_code(response.status) {
            if request.is_main_frame {
                if let Some(target) = http::redirect_target(&request.url, &response) {
                    debug!(url = %request.url, %target, "Reloading at redirect target");
                    return Interception::Reload(target);
                }
            }
            return Interception::Default;
        }

        let mut url = request.url.clone();
        if let Some(final_url) = response.final_url.as_ref().filter(|final_url| **final_url != url) {
            debug!(%final_url, was = %url, "Updating url");
            url = final_url.clone();
        }

        if let Some(header) = response.headers.get(HEADER_SITEKEY).and_then(|v| v.to_str().ok()) {
            match site_keys.verifier().verify(&url, request.user_agent(), header) {
                Ok(true) => debug!(%url, "Public key verified successfully"),
                Ok(false) => error!(%url, "Public key is not verified"),
                Err(e) => error!(%url, "Failed to verify sitekey header: {}", e),
            }
        }

        let (mime_type, mut encoding) = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(http::split_content_type)
            .unwrap_or((None, None));
        if encoding.is_none() {
            encoding = response
                .headers
                .get(CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }

        let Some(body) = response.body else {
            return Interception::Default;
        };

        Interception::Respond(FetchedResponse {
            url,
            mime_type,
            encoding,
            status: response.status,
            reason: response.status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers: response.headers,
            body,
        })
    }
}
