//! Link discovery: extract `<a href>` targets from an HTML body, resolve
//! them against the page's own URL, and filter them against a set of
//! caller-supplied regexes.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Extract every absolute link reachable from an anchor tag in `html`,
/// resolving relative hrefs against `base_url`. Malformed hrefs are
/// skipped rather than failing the whole page.
pub fn extract_links(base_url: &str, html: &[u8]) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(html);
    let document = Html::parse_document(&text);
    let selector = Selector::parse("a[href]").expect("\"a[href]\" is a valid CSS selector");

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Ok(resolved) = base.join(href) {
            if matches!(resolved.scheme(), "http" | "https") {
                links.push(resolved.to_string());
            }
        }
    }
    links
}

/// Compile a set of target-filter patterns. Any pattern that fails to
/// compile is an error for the whole set, since a crawler silently
/// dropping half its filters would behave unexpectedly.
pub fn compile_target_filters(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}

/// Whether `url` matches at least one of `filters`. An empty filter set
/// matches nothing, the same as the reference crawler requiring at least
/// one `--target-regex`.
pub fn matches_any_filter(url: &str, filters: &[Regex]) -> bool {
    filters.iter().any(|f| f.is_match(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_resolves_relative_links() {
        let html = br#"<html><body>
            <a href="/about">About</a>
            <a href="https://other.example/x">Other</a>
            <a href="mailto:someone@example.com">Mail</a>
        </body></html>"#;
        let links = extract_links("https://example.com/index.html", html);
        assert!(links.contains(&"https://example.com/about".to_string()));
        assert!(links.contains(&"https://other.example/x".to_string()));
        assert!(!links.iter().any(|l| l.starts_with("mailto:")));
    }

    #[test]
    fn malformed_base_url_yields_no_links() {
        let links = extract_links("not a url", b"<a href=\"/x\">x</a>");
        assert!(links.is_empty());
    }

    #[test]
    fn matches_any_filter_requires_at_least_one_match() {
        let filters = compile_target_filters(&[r"^https://example\.com/docs/.*".to_string()]).unwrap();
        assert!(matches_any_filter("https://example.com/docs/a", &filters));
        assert!(!matches_any_filter("https://other.example/docs/a", &filters));
    }

    #[test]
    fn empty_filter_set_matches_nothing() {
        let filters = compile_target_filters(&[]).unwrap();
        assert!(!matches_any_filter("https://example.com/", &filters));
    }
}
