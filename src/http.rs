use crate::config::SiteKeySettings;
use crate::error::HttpError;

use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, Method, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, error};
use url::Url;

/// An out-of-band request issued on behalf of the web view.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub follow_redirects: bool,
}

#[derive(Debug, Clone)]
pub struct ServerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// URL after redirects, when the client followed any.
    pub final_url: Option<String>,
}

/// Synchronous HTTP collaborator. Any error means "let the host load it itself".
pub trait HttpClient: Send + Sync {
    fn request(&self, request: &HttpRequest) -> Result<ServerResponse, HttpError>;
}

pub fn is_redirect_code(status: StatusCode) -> bool {
    (300..=399).contains(&status.as_u16())
}

pub fn is_success_code(status: StatusCode) -> bool {
    (200..=299).contains(&status.as_u16())
}

pub fn parse_method(method: &str) -> Result<Method, HttpError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| HttpError::InvalidMethod(method.to_string()))
}

/// Resolves a `Location` value against the URL that was requested.
pub fn resolve_location(base_url: &str, location: &str) -> Result<String, url::ParseError> {
    match Url::parse(location) {
        Ok(absolute) => Ok(absolute.into()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Url::parse(base_url)?.join(location)?.into()),
        Err(e) => Err(e),
    }
}

/// Absolute redirect target of `response`, if it carries a usable `Location`.
pub fn redirect_target(request_url: &str, response: &ServerResponse) -> Option<String> {
    let location = response
        .headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())?;

    match resolve_location(request_url, location) {
        Ok(target) => Some(target),
        Err(e) => {
            error!(url = %request_url, %location, "Failed to build absolute redirect URL: {}", e);
            None
        }
    }
}

/// Splits a `content-type` value into mime type and charset.
pub fn split_content_type(value: &str) -> (Option<String>, Option<String>) {
    match value.find(';') {
        Some(pos) if pos > 0 => {
            let mime = value[..pos].trim().to_string();
            let charset = value
                .find('=')
                .filter(|eq| *eq > 0 && *eq < value.len() - 1)
                .map(|eq| value[eq + 1..].trim().trim_matches('"').to_string());
            (Some(mime), charset)
        }
        _ if value.find('/').is_some_and(|slash| slash > 0) => (Some(value.trim().to_string()), None),
        _ => (None, None),
    }
}

/// [`HttpClient`] over reqwest, driven by a private tokio runtime so it can be
/// called from the host's plain threads.
pub struct ReqwestHttpClient {
    runtime: Runtime,
    following: Client,
    manual: Client,
}

impl ReqwestHttpClient {
    pub fn new(settings: &SiteKeySettings) -> Result<Self, HttpError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("adblock-http")
            .enable_all()
            .build()?;

        let timeout = Duration::from_secs(settings.http_timeout_secs);
        let following = Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.as_str())
            .build()?;
        let manual = Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            runtime,
            following,
            manual,
        })
    }
}

impl ReqwestHttpClient {
    fn fetch(&self, request: &HttpRequest) -> Result<ServerResponse, HttpError> {
        let url = Url::parse(&request.url).map_err(|source| HttpError::InvalidUrl {
            url: request.url.clone(),
            source,
        })?;
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.manual
        };

        debug!(url = %request.url, method = %request.method, "Fetching");
        self.runtime.block_on(async {
            let response = client
                .request(request.method.clone(), url)
                .headers(request.headers.clone())
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let final_url = response.url().to_string();
            let body = response.bytes().await?;

            Ok::<_, HttpError>(ServerResponse {
                status,
                headers,
                body: Some(body),
                final_url: Some(final_url),
            })
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn request(&self, request: &HttpRequest) -> Result<ServerResponse, HttpError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.fetch(request);
        }

        // `block_on` panics on a thread that already runs inside a tokio runtime.
        debug!(url = %request.url, "Called from a tokio runtime, fetching on a helper thread");
        std::thread::scope(|scope| {
            let fetching = std::thread::Builder::new()
                .name("adblock-fetch".to_string())
                .spawn_scoped(scope, || self.fetch(request))?;
            fetching.join().unwrap_or(Err(HttpError::FetchThreadPanicked))
        })
    }
}
