//! Discovery strategies, each a pure `RenderedPage -> Option<Url>` function.

use super::page::{link_attr, link_attr_or_parent, own_text, RenderedPage};
use super::LocatorRules;
use scraper::{ElementRef, Selector};
use std::sync::OnceLock;
use url::Url;

/// CSS selectors associated with document downloads, tried after the text labels.
const DOWNLOAD_SELECTORS: &[&str] = &[
    r#"a[href*=".pdf"]"#,
    r#"button[href*=".pdf"]"#,
    "a[download]",
    r#"a[type="application/pdf"]"#,
];

fn all_elements() -> Option<&'static Selector> {
    static SEL: OnceLock<Option<Selector>> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("*").ok()).as_ref()
}

fn anchors() -> Option<&'static Selector> {
    static SEL: OnceLock<Option<Selector>> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").ok()).as_ref()
}

fn download_selectors() -> &'static [Selector] {
    static SELS: OnceLock<Vec<Selector>> = OnceLock::new();
    SELS.get_or_init(|| {
        DOWNLOAD_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect()
    })
}

/// Resolve `href` and keep it only if it passes the document check.
fn document_link(page: &RenderedPage, rules: &LocatorRules, href: Option<&str>) -> Option<Url> {
    let url = page.resolve(href?)?;
    rules.is_document(&url).then_some(url)
}

/// Strategy 1: walk up from the marker phrase, looking for a document label.
///
/// For each element whose own text carries a marker, search the element's
/// descendants, then its parent's, and so on for at most
/// `rules.max_ancestor_depth` levels. Inside a scope, only elements whose own
/// text is a download label qualify; the link comes from the element or its
/// immediate container. Unlabelled links next to the marker are ignored. The
/// nearest scope with a labelled document link wins.
pub fn anchored_text(page: &RenderedPage, rules: &LocatorRules) -> Option<Url> {
    let anchors = page
        .document()
        .select(all_elements()?)
        .filter(|el| rules.is_marker(&own_text(*el)));

    for anchor in anchors {
        let mut scope = Some(anchor);
        for _ in 0..rules.max_ancestor_depth {
            let Some(container) = scope else { break };

            let labelled = container
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .filter(|el| rules.is_link_label(&own_text(*el)));

            for candidate in labelled {
                if let Some(url) = document_link(page, rules, link_attr_or_parent(candidate)) {
                    return Some(url);
                }
            }

            scope = container.parent().and_then(ElementRef::wrap);
        }
    }
    None
}

/// Strategy 2: page-wide scan for download labels, then download selectors.
pub fn label_pattern(page: &RenderedPage, rules: &LocatorRules) -> Option<Url> {
    for label in &rules.link_labels {
        let hit = page
            .document()
            .select(all_elements()?)
            .filter(|el| label.is_match(&own_text(*el)))
            .find_map(|el| document_link(page, rules, link_attr(el)));
        if hit.is_some() {
            return hit;
        }
    }

    download_selectors().iter().find_map(|selector| {
        page.document()
            .select(selector)
            .find_map(|el| document_link(page, rules, link_attr(el)))
    })
}

/// Strategy 3: first link on the page, in document order, that looks like a document.
pub fn exhaustive_link(page: &RenderedPage, rules: &LocatorRules) -> Option<Url> {
    page.document()
        .select(anchors()?)
        .find_map(|el| document_link(page, rules, link_attr(el)))
}

/// First link to another catalogue page (not a document, not this page).
pub fn catalogue_subpage(page: &RenderedPage, rules: &LocatorRules) -> Option<Url> {
    let current = without_fragment(page.url());
    page.document()
        .select(anchors()?)
        .filter_map(|el| page.resolve(link_attr(el)?))
        .filter(|url| !rules.is_document(url))
        .filter(|url| rules.subpage.is_match(url.as_str()))
        .find(|url| without_fragment(url) != current)
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}
