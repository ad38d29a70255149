//! Site keys: public keys that pages prove ownership of through a signed
//! `x-adblock-key` response header, used to parameterize filter queries for every
//! request whose referrer chain passes through the signing page.

use crate::error::SiteKeyError;
use crate::http::HttpClient;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Response header carrying `<base64 public key>_<base64 signature>`.
pub const HEADER_SITEKEY: &str = "x-adblock-key";

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Verified public keys by the URL that served them.
#[derive(Debug, Default)]
pub struct PublicKeyHolder {
    keys: DashMap<String, String>,
}

impl PublicKeyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, url: &str, public_key: &str) {
        self.keys.insert(url.to_string(), public_key.to_string());
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.keys.get(url).map(|entry| entry.value().clone())
    }

    /// Key of the first URL in `urls` that has one.
    pub fn get_any(&self, urls: &[String]) -> Option<String> {
        urls.iter().find_map(|url| self.get(url))
    }

    pub fn clear(&self) {
        self.keys.clear();
    }
}

/// Keys are compared without their base64 padding.
pub fn strip_padding(key: &str) -> &str {
    key.trim_end_matches('=')
}

/// The cryptographic half of site key verification.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8]) -> bool;
}

/// Checks `x-adblock-key` headers and remembers the keys that verify.
pub struct SiteKeyVerifier {
    holder: Arc<PublicKeyHolder>,
    signatures: Arc<dyn SignatureVerifier>,
}

impl SiteKeyVerifier {
    pub fn new(holder: Arc<PublicKeyHolder>, signatures: Arc<dyn SignatureVerifier>) -> Self {
        Self { holder, signatures }
    }

    /// `Ok(true)` stores the key for `url`. `Ok(false)` means a well-formed header
    /// whose signature does not match.
    pub fn verify(&self, url: &str, user_agent: Option<&str>, header_value: &str) -> Result<bool, SiteKeyError> {
        let (public_key, signature) = header_value
            .split_once('_')
            .filter(|(key, sig)| !key.is_empty() && !sig.is_empty())
            .ok_or_else(|| SiteKeyError::MalformedHeader(header_value.to_string()))?;

        let key_bytes = LENIENT_BASE64.decode(public_key)?;
        let signature_bytes = LENIENT_BASE64.decode(signature)?;
        let data = signed_data(url, user_agent.unwrap_or(""))?;

        if !self.signatures.verify(&key_bytes, data.as_bytes(), &signature_bytes) {
            return Ok(false);
        }

        debug!(%url, "Storing verified site key");
        self.holder.put(url, public_key);
        Ok(true)
    }
}

/// `<path>[?query]\0<host>[:port]\0<user agent>`
pub fn signed_data(url: &str, user_agent: &str) -> Result<String, SiteKeyError> {
    let parsed = Url::parse(url).map_err(|source| SiteKeyError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let mut uri = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        uri.push('?');
        uri.push_str(query);
    }

    let mut host = parsed.host_str().unwrap_or_default().to_string();
    if let Some(port) = parsed.port() {
        host.push_str(&format!(":{port}"));
    }

    Ok(format!("{uri}\0{host}\0{user_agent}"))
}

/// Everything signed-header verification needs: the HTTP collaborator for the
/// out-of-band fetch, the verifier, and the keys verified so far.
pub struct SiteKeysConfiguration {
    http_client: Arc<dyn HttpClient>,
    holder: Arc<PublicKeyHolder>,
    verifier: SiteKeyVerifier,
}

impl SiteKeysConfiguration {
    pub fn new(http_client: Arc<dyn HttpClient>, signatures: Arc<dyn SignatureVerifier>) -> Self {
        let holder = Arc::new(PublicKeyHolder::new());
        Self {
            http_client,
            verifier: SiteKeyVerifier::new(holder.clone(), signatures),
            holder,
        }
    }

    pub fn http_client(&self) -> &dyn HttpClient {
        self.http_client.as_ref()
    }

    pub fn verifier(&self) -> &SiteKeyVerifier {
        &self.verifier
    }

    pub fn public_key_holder(&self) -> &PublicKeyHolder {
        &self.holder
    }

    /// Site key for a referrer chain, padding stripped. `None` means unkeyed.
    pub fn site_key_for(&self, referrer_chain: &[String]) -> Option<String> {
        self.holder
            .get_any(referrer_chain)
            .map(|key| strip_padding(&key).to_string())
            .filter(|key| !key.is_empty())
    }
}
