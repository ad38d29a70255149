use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a filtered web view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub filter_rules: Vec<String>,
    pub filter_lists: Vec<PathBuf>,
    pub whitelist_domains: Vec<String>,
    pub debug_mode: bool,
    pub bridge_timeout_ms: Option<u64>,
    pub site_keys: Option<SiteKeySettings>,
}

/// Settings for the out-of-band fetch used to verify signed response headers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteKeySettings {
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_rules: vec![
                "||doubleclick.net^".to_string(),
                "||googlesyndication.com^".to_string(),
                "||google-analytics.com^$third-party".to_string(),
                "/ads/*$script,image".to_string(),
                "##.ad-banner".to_string(),
                "##.sponsored".to_string(),
            ],
            filter_lists: vec![],
            whitelist_domains: vec![],
            debug_mode: false,
            bridge_timeout_ms: None,
            site_keys: None,
        }
    }
}

impl Default for SiteKeySettings {
    fn default() -> Self {
        Self {
            user_agent: "AdblockWebView/0.1".to_string(),
            http_timeout_secs: 15,
        }
    }
}

impl FilterConfig {
    /// No built-in rules; only what the caller adds.
    pub fn minimal() -> Self {
        Self {
            filter_rules: vec![],
            ..Default::default()
        }
    }

    /// Minimal configuration carrying the given inline rules.
    pub fn with_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter_rules: rules.into_iter().map(Into::into).collect(),
            ..Self::minimal()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse filter configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn bridge_timeout(&self) -> Option<Duration> {
        self.bridge_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = FilterConfig::from_json_str(r#"{ "debug_mode": true }"#).unwrap();
        assert!(config.debug_mode);
        assert_eq!(config.filter_rules, FilterConfig::default().filter_rules);
        assert!(config.site_keys.is_none());
    }

    #[test]
    fn site_key_settings_are_parsed() {
        let config = FilterConfig::from_json_str(
            r#"{ "filter_rules": ["||ads.test^"], "site_keys": { "http_timeout_secs": 3 }, "bridge_timeout_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.filter_rules, vec!["||ads.test^".to_string()]);
        let site_keys = config.site_keys.as_ref().unwrap();
        assert_eq!(site_keys.http_timeout_secs, 3);
        assert_eq!(site_keys.user_agent, SiteKeySettings::default().user_agent);
        assert_eq!(config.bridge_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(FilterConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn reads_config_from_file() {
        let path = std::env::temp_dir().join(format!("adblock-webview-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "whitelist_domains": ["trusted.test"] }"#).unwrap();
        let config = FilterConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.whitelist_domains, vec!["trusted.test".to_string()]);
    }
}
