use adblock_webview::prelude::*;
use anyhow::Result;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Optional JSON config path as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => FilterConfig::from_json_file(path)?,
        None => demo_config(),
    };

    let default_level = if config.debug_mode { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    println!("🛡️  Adblock WebView Demo");

    let filter = WebViewFilter::new(config)?;
    let page = "https://a.test/";
    filter.on_page_started(page);

    let requests = vec![
        ResourceRequest::get(page).main_frame(),
        ResourceRequest::get("https://ads.test/x.js").with_referrer(page),
        ResourceRequest::get("https://cdn.test/y.js"),
        ResourceRequest::get("https://a.test/frame.html").with_referrer(page),
        ResourceRequest::get("https://tracker.test/pixel.gif").with_referrer("https://a.test/frame.html"),
        ResourceRequest::get("https://a.test/api/feed")
            .with_referrer(page)
            .with_header("X-Requested-With", "XMLHttpRequest"),
    ];

    println!("\n📋 Resource loads:");
    for request in &requests {
        let status = match filter.intercept(request) {
            Interception::Block(_) => "🚫 BLOCKED",
            Interception::Reload(_) => "↪️  RELOAD",
            Interception::Respond(_) => "📦 FETCHED",
            Interception::Default => "✅ ALLOWED",
        };
        println!("{} - {}", status, request.url);
    }

    println!("\n🔗 Referrer chain of tracker.test pixel:");
    for url in filter.referrers().chain_for("https://tracker.test/pixel.gif") {
        println!("   {url}");
    }

    println!("\n🎨 Element hiding selectors: {}", filter.elemhide_selectors());
    filter.on_page_finished(page);

    let stats = filter.stats();
    println!("\n📊 Statistics:");
    println!("   Total requests: {}", stats.total_requests);
    println!("   Blocked: {} ({:.1}%)", stats.blocked_requests, stats.block_percentage());
    println!("   Whitelisted: {}", stats.whitelisted_requests);
    println!("   Allowed: {}", stats.allowed_requests);
    println!("   Main frame: {}", stats.main_frame_requests);

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    filter.dispose(Some(Box::new(move || {
        done_tx.send(()).ok();
    })));
    done_rx.recv()?;
    println!("\n🧹 Filter disposed");

    Ok(())
}

fn demo_config() -> FilterConfig {
    let mut config = FilterConfig::default();
    config.filter_rules.extend([
        "||ads.test^$script".to_string(),
        "||tracker.test^$image".to_string(),
        "a.test##.sponsored".to_string(),
        "a.test###top-ad".to_string(),
    ]);
    config.whitelist_domains.push("trusted.test".to_string());
    config
}
