use thiserror::Error;

/// Failures of the HTTP collaborator. Every variant means "fall back to default loading".
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid request url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid request method {0}")]
    InvalidMethod(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http runtime unavailable: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("fetch thread panicked")]
    FetchThreadPanicked,
}

/// Failures while checking an `x-adblock-key` response header.
#[derive(Debug, Error)]
pub enum SiteKeyError {
    #[error("malformed site key header: {0}")]
    MalformedHeader(String),

    #[error("site key header is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("cannot build signed data for {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}
