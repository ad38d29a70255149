use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Content type of a sub-resource, as understood by the filter engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Other,
    Script,
    Image,
    Stylesheet,
    Object,
    Subdocument,
    Document,
    XmlHttpRequest,
    Media,
    Font,
}

impl ContentType {
    /// Request type name used by `adblock::request::Request`.
    pub fn as_request_type(&self) -> &'static str {
        match self {
            ContentType::Other => "other",
            ContentType::Script => "script",
            ContentType::Image => "image",
            ContentType::Stylesheet => "stylesheet",
            ContentType::Object => "object",
            ContentType::Subdocument => "sub_frame",
            ContentType::Document => "document",
            ContentType::XmlHttpRequest => "xmlhttprequest",
            ContentType::Media => "media",
            ContentType::Font => "font",
        }
    }
}

/// Guesses a content type from the URL path suffix.
#[derive(Debug, Clone)]
pub struct ContentTypeDetector {
    patterns: Vec<(Regex, ContentType)>,
}

impl ContentTypeDetector {
    pub fn new() -> Result<Self> {
        let patterns = vec![
            (r"(?i)\.js$", ContentType::Script),
            (r"(?i)\.css$", ContentType::Stylesheet),
            (r"(?i)\.(gif|png|jpe?g|bmp|ico|webp|svg)$", ContentType::Image),
            (r"(?i)\.(ttf|otf|woff2?|eot)$", ContentType::Font),
            (r"(?i)\.html?$", ContentType::Subdocument),
            (r"(?i)\.(mp3|mp4|m4a|ogg|webm|wav|avi|mov)$", ContentType::Media),
            (r"(?i)\.(swf|jar|class)$", ContentType::Object),
        ];

        let patterns = patterns
            .into_iter()
            .map(|(p, content_type)| Regex::new(p).map(|re| (re, content_type)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to compile content type regex: {}", e))?;

        Ok(Self { patterns })
    }

    /// Returns `None` when no suffix rule matches; callers fall back to `ContentType::Other`.
    pub fn detect(&self, url: &str) -> Option<ContentType> {
        let path = url_without_params(url);
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(path))
            .map(|(_, content_type)| *content_type)
    }
}

fn url_without_params(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
