//! A rendered page snapshot and the element helpers the strategies share.

use scraper::{ElementRef, Html};
use url::Url;

/// Elements whose text is never page copy.
const NON_CONTENT_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// HTML captured from the browser after rendering, plus the URL it came from.
///
/// Not `Send` (scraper's DOM uses non-atomic tendrils): build it, query it and
/// drop it without holding it across an `.await`.
pub struct RenderedPage {
    url: Url,
    document: Html,
}

impl RenderedPage {
    pub fn parse(url: Url, html: &str) -> Self {
        Self {
            url,
            document: Html::parse_document(html),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Resolve a link attribute against the page URL; only http(s) survives.
    pub fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }
        let url = self.url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }
}

/// Text directly inside `element` (not its descendants), normalized for
/// matching: lowercased, typographic apostrophes folded, whitespace collapsed.
pub fn own_text(element: ElementRef<'_>) -> String {
    if NON_CONTENT_TAGS.contains(&element.value().name()) {
        return String::new();
    }
    let mut raw = String::new();
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    normalize(&raw)
}

/// Lowercase, fold `’`/`‘` to `'`, collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['\u{2019}', '\u{2018}'], "'")
        .to_lowercase()
}

/// The element's own link attribute.
pub fn link_attr<'a>(element: ElementRef<'a>) -> Option<&'a str> {
    element.value().attr("href")
}

/// The element's link attribute, falling back to its immediate container's.
pub fn link_attr_or_parent<'a>(element: ElementRef<'a>) -> Option<&'a str> {
    link_attr(element).or_else(|| {
        element
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(link_attr)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    fn page(html: &str) -> RenderedPage {
        RenderedPage::parse(Url::parse("https://shop.example/catalogues/").unwrap(), html)
    }

    #[test]
    fn test_own_text_ignores_descendants() {
        let p = page("<div>  This   Week\u{2019}s <span>ignored</span> Catalogue </div>");
        let sel = Selector::parse("div").unwrap();
        let div = p.document().select(&sel).next().unwrap();
        assert_eq!(own_text(div), "this week's catalogue");
    }

    #[test]
    fn test_own_text_skips_scripts() {
        let p = page("<script>var t = \"This week's catalogue\";</script>");
        let sel = Selector::parse("script").unwrap();
        let script = p.document().select(&sel).next().unwrap();
        assert_eq!(own_text(script), "");
    }

    #[test]
    fn test_resolve_relative_and_rejects_non_http() {
        let p = page("");
        assert_eq!(
            p.resolve("../files/weekly.pdf").unwrap().as_str(),
            "https://shop.example/files/weekly.pdf"
        );
        assert!(p.resolve("javascript:void(0)").is_none());
        assert!(p.resolve("mailto:a@b.c").is_none());
        assert!(p.resolve("#top").is_none());
        assert!(p.resolve("   ").is_none());
    }

    #[test]
    fn test_link_attr_falls_back_to_parent() {
        let p = page(r#"<a href="/w.pdf"><span>Download PDF</span></a>"#);
        let sel = Selector::parse("span").unwrap();
        let span = p.document().select(&sel).next().unwrap();
        assert_eq!(link_attr(span), None);
        assert_eq!(link_attr_or_parent(span), Some("/w.pdf"));
    }
}
