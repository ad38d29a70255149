use adblock_webview::{FilterConfig, Interception, ResourceRequest, WebViewFilter};
use std::io::Write;

fn config() -> FilterConfig {
    let mut config = FilterConfig::with_rules([
        "||ads.test^$script",
        "a.test##.sponsored",
        "a.test###top-ad",
    ]);
    config.whitelist_domains = vec!["trusted.test".to_string()];
    config
}

#[test]
fn navigation_against_adblock_rules() {
    let filter = WebViewFilter::new(config()).unwrap();
    filter.on_page_started("https://a.test/");

    let blocked = filter.intercept(&ResourceRequest::get("https://ads.test/x.js").with_referrer("https://a.test/"));
    assert!(blocked.is_block());
    let image = filter.intercept(&ResourceRequest::get("https://ads.test/x.png").with_referrer("https://a.test/"));
    assert!(image.is_default());
    assert!(filter.intercept(&ResourceRequest::get("https://cdn.test/y.js")).is_default());
    assert!(
        filter
            .intercept(&ResourceRequest::get("https://ads.test/z.js").with_referrer("https://trusted.test/"))
            .is_default()
    );

    assert_eq!(filter.elemhide_selectors(), r##"["#top-ad",".sponsored"]"##);

    let stats = filter.stats();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.blocked_requests, 1);
    assert_eq!(stats.whitelisted_requests, 1);
    filter.dispose(None);
}

#[test]
fn rules_from_list_files() {
    let path = std::env::temp_dir().join(format!("adblock-webview-list-{}.txt", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[Adblock Plus 2.0]").unwrap();
        writeln!(file, "! Title: test list").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "||tracker.test^").unwrap();
    }

    let mut config = FilterConfig::minimal();
    config.filter_lists = vec![path.clone()];
    let filter = WebViewFilter::new(config).unwrap();
    filter.on_page_started("https://a.test/");

    let request = ResourceRequest::get("https://tracker.test/pixel.gif").with_referrer("https://a.test/");
    assert!(matches!(filter.intercept(&request), Interception::Block(_)));
    assert_eq!(filter.elemhide_selectors(), "[]");

    filter.dispose(None);
    std::fs::remove_file(path).ok();
}
