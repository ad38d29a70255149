//! Adblock WebView Library
//!
//! Ad filtering for an embedded browser view: per-request block decisions,
//! per-navigation element hiding selectors for the injected script, and safe
//! teardown of the shared filter engine while requests are still in flight.
//!
//! # Quick Start
//!
//! ```rust
//! use adblock_webview::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let filter = WebViewFilter::new(FilterConfig::with_rules(["||ads.test^$script"]))?;
//!
//!     filter.on_page_started("https://a.test/");
//!     let request = ResourceRequest::get("https://ads.test/x.js").with_referrer("https://a.test/");
//!     if filter.intercept(&request).is_block() {
//!         println!("Ad blocked!");
//!     }
//!
//!     println!("selectors: {}", filter.elemhide_selectors());
//!     filter.dispose(None);
//!     Ok(())
//! }
//! ```

pub mod barrier;
pub mod config;
pub mod content_type;
pub mod elemhide;
pub mod engine;
pub mod error;
pub mod filters;
pub mod handle;
pub mod http;
pub mod interceptor;
pub mod referrer;
pub mod sitekey;
pub mod types;
pub mod webview;

pub use config::{FilterConfig, SiteKeySettings};
pub use content_type::ContentType;
pub use elemhide::{ElemhideOutcome, ElemhideTask, TaskState};
pub use engine::{AdblockEngine, AdblockEngineFactory, EngineFactory, FilterEngine, Subscription};
pub use error::{HttpError, SiteKeyError};
pub use handle::EngineHandle;
pub use referrer::ReferrerGraph;
pub use types::{Decision, FilterStatsSnapshot, Interception, ResourceRequest};
pub use webview::WebViewFilter;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ContentType, EngineHandle, FilterConfig, FilterEngine, Interception, ResourceRequest, TaskState, WebViewFilter,
    };
}
