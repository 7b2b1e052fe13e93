//! Locates the current week's catalogue document on a retailer page.
//!
//! Discovery is an ordered chain of pure strategies, precision first and
//! breadth last:
//!
//! 1. **Anchored text**: start at the retailer's marker phrase ("This week's
//!    catalogue") and widen the search one ancestor at a time (bounded).
//! 2. **Label pattern**: page-wide scan for "Download PDF"-style labels and
//!    download selectors.
//! 3. **Exhaustive link**: the first document link anywhere on the page.
//!    It may pick up archived catalogues, so it only runs when the others fail.
//!
//! The first strategy that yields a URL wins; later ones are not evaluated.

pub mod page;
pub mod strategies;

pub use page::RenderedPage;

use crate::config::{ConfigError, RetailerConfig};
use crate::types::RetailerId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum number of ancestor levels the anchored-text strategy widens through.
pub const MAX_ANCESTOR_DEPTH: usize = 10;

/// Labels that mark a document download control (matched against normalized text).
const LINK_LABELS: &[&str] = &[r"download\s*pdf", r"\bpdf\b"];

/// Links that lead to another catalogue listing page.
const SUBPAGE_PATTERN: &str = r"(?i)catalog(ue)?";

/// A discovery strategy: pure function from a rendered page to a document URL.
pub type Strategy = fn(&RenderedPage, &LocatorRules) -> Option<Url>;

/// Which strategy produced a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AnchoredText,
    LabelPattern,
    ExhaustiveLink,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnchoredText => "anchored_text",
            Self::LabelPattern => "label_pattern",
            Self::ExhaustiveLink => "exhaustive_link",
        }
    }
}

/// The strategy chain in priority order.
pub const STRATEGIES: [(StrategyKind, Strategy); 3] = [
    (StrategyKind::AnchoredText, strategies::anchored_text),
    (StrategyKind::LabelPattern, strategies::label_pattern),
    (StrategyKind::ExhaustiveLink, strategies::exhaustive_link),
];

/// A located document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub url: Url,
    pub strategy: StrategyKind,
}

/// Compiled matching rules for one retailer.
#[derive(Debug, Clone)]
pub struct LocatorRules {
    /// Normalized marker phrases.
    pub markers: Vec<String>,
    pub link_labels: Vec<Regex>,
    pub document: Regex,
    pub subpage: Regex,
    pub max_ancestor_depth: usize,
}

impl LocatorRules {
    pub fn is_marker(&self, normalized_text: &str) -> bool {
        !normalized_text.is_empty() && self.markers.iter().any(|m| normalized_text.contains(m))
    }

    pub fn is_link_label(&self, normalized_text: &str) -> bool {
        self.link_labels.iter().any(|re| re.is_match(normalized_text))
    }

    pub fn is_document(&self, url: &Url) -> bool {
        self.document.is_match(url.as_str())
    }
}

/// Runs the strategy chain for one retailer.
#[derive(Debug, Clone)]
pub struct Locator {
    retailer: RetailerId,
    rules: LocatorRules,
}

impl Locator {
    /// Compile the retailer's markers and document pattern.
    pub fn for_retailer(config: &RetailerConfig) -> Result<Self, ConfigError> {
        let link_labels = LINK_LABELS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Invalid(format!("link label pattern: {e}")))?;
        let subpage = Regex::new(SUBPAGE_PATTERN)
            .map_err(|e| ConfigError::Invalid(format!("subpage pattern: {e}")))?;

        Ok(Self {
            retailer: config.id.clone(),
            rules: LocatorRules {
                markers: config
                    .anchor_markers
                    .iter()
                    .map(|m| page::normalize(m))
                    .filter(|m| !m.is_empty())
                    .collect(),
                link_labels,
                document: config.document_regex()?,
                subpage,
                max_ancestor_depth: MAX_ANCESTOR_DEPTH,
            },
        })
    }

    pub fn rules(&self) -> &LocatorRules {
        &self.rules
    }

    /// Run the chain; `None` means NotFound.
    pub fn locate(&self, page: &RenderedPage) -> Option<Located> {
        for (kind, strategy) in STRATEGIES {
            match strategy(page, &self.rules) {
                Some(url) => {
                    tracing::info!(
                        retailer = %self.retailer,
                        strategy = kind.as_str(),
                        "located catalogue document {url}"
                    );
                    return Some(Located { url, strategy: kind });
                }
                None => {
                    tracing::debug!(
                        retailer = %self.retailer,
                        strategy = kind.as_str(),
                        "strategy found nothing on {}",
                        page.url()
                    );
                }
            }
        }
        None
    }

    /// Parse `html` and run the chain. The parsed DOM never outlives this call.
    pub fn locate_html(&self, url: &Url, html: &str) -> Option<Located> {
        let page = RenderedPage::parse(url.clone(), html);
        self.locate(&page)
    }

    /// A catalogue listing page linked from `html`, for a second discovery pass.
    pub fn catalogue_subpage_html(&self, url: &Url, html: &str) -> Option<Url> {
        let page = RenderedPage::parse(url.clone(), html);
        strategies::catalogue_subpage(&page, &self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Locator {
        Locator::for_retailer(&RetailerConfig::coles().unwrap()).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://www.coles.com.au/catalogues").unwrap()
    }

    #[test]
    fn test_anchored_text_prefers_current_week_over_archive() {
        let html = r#"
            <html><body>
              <section class="archive">
                <h3>Past catalogues</h3>
                <a href="https://cdn.example.com/archive-2023.pdf">Download PDF</a>
              </section>
              <section class="current">
                <div class="header"><h2>This week's catalogue</h2></div>
                <div class="actions">
                  <a href="https://cdn.example.com/weekly.pdf"><span>Download PDF</span></a>
                </div>
              </section>
            </body></html>"#;

        let found = locator().locate_html(&base(), html).unwrap();
        assert_eq!(found.url.as_str(), "https://cdn.example.com/weekly.pdf");
        assert_eq!(found.strategy, StrategyKind::AnchoredText);
    }

    #[test]
    fn test_anchored_text_handles_curly_apostrophe_and_case() {
        let html = r#"
            <a href="/old/archive-2023.pdf">PDF</a>
            <div><p>THIS WEEK’S CATALOGUE</p><a href="/c/weekly.PDF">Pdf</a></div>"#;
        let found = locator().locate_html(&base(), html).unwrap();
        assert_eq!(found.url.as_str(), "https://www.coles.com.au/c/weekly.PDF");
        assert_eq!(found.strategy, StrategyKind::AnchoredText);
    }

    #[test]
    fn test_anchored_text_skips_unlabelled_link_beside_marker() {
        let html = r#"
            <section>
              <h2>This week's catalogue</h2>
              <a href="https://cdn.example.com/archive-2023.pdf">Last week</a>
              <a href="https://cdn.example.com/weekly.pdf">Download PDF</a>
            </section>"#;
        let found = locator().locate_html(&base(), html).unwrap();
        assert_eq!(found.url.as_str(), "https://cdn.example.com/weekly.pdf");
        assert_eq!(found.strategy, StrategyKind::AnchoredText);
    }

    #[test]
    fn test_anchored_text_depth_is_bounded() {
        // Marker nested 12 levels below the element that holds the link.
        let mut html = String::from(r#"<div><a href="/far.pdf">Download PDF</a>"#);
        for _ in 0..12 {
            html.push_str("<div>");
        }
        html.push_str("<span>This week's catalogue</span>");
        for _ in 0..12 {
            html.push_str("</div>");
        }
        html.push_str("</div>");

        let found = locator().locate_html(&base(), &html).unwrap();
        // Still found, but only by the page-wide label strategy.
        assert_eq!(found.strategy, StrategyKind::LabelPattern);
        assert_eq!(found.url.as_str(), "https://www.coles.com.au/far.pdf");
    }

    #[test]
    fn test_label_pattern_when_no_marker() {
        let html = r#"
            <a href="/about">About</a>
            <a href="/files/other.pdf">Terms</a>
            <a class="btn" href="/files/catalogue.pdf">Download PDF</a>"#;
        let found = locator().locate_html(&base(), html).unwrap();
        assert_eq!(found.strategy, StrategyKind::LabelPattern);
        assert_eq!(found.url.as_str(), "https://www.coles.com.au/files/catalogue.pdf");
    }

    #[test]
    fn test_label_pattern_selector_fallback() {
        let html = r#"<button href="/files/weekly.pdf">Open</button><a href="/x">x</a>"#;
        let found = locator().locate_html(&base(), html).unwrap();
        assert_eq!(found.strategy, StrategyKind::LabelPattern);
        assert_eq!(found.url.as_str(), "https://www.coles.com.au/files/weekly.pdf");
    }

    #[test]
    fn test_exhaustive_link_last_resort() {
        let html = r#"
            <a href="/help">Help</a>
            <a href="/files/Weekly-Specials.Pdf?v=3">Specials</a>"#;
        let found = locator().locate_html(&base(), html).unwrap();
        assert_eq!(found.strategy, StrategyKind::ExhaustiveLink);
        assert_eq!(
            found.url.as_str(),
            "https://www.coles.com.au/files/Weekly-Specials.Pdf?v=3"
        );
    }

    #[test]
    fn test_not_found() {
        let html = r#"<h2>This week's catalogue</h2><a href="/flyer">View online</a>"#;
        assert!(locator().locate_html(&base(), html).is_none());
    }

    #[test]
    fn test_custom_document_pattern() {
        let mut cfg = RetailerConfig::coles().unwrap();
        cfg.document_pattern = r"(?i)/flyers/.+\.pdf$".to_string();
        let locator = Locator::for_retailer(&cfg).unwrap();
        let html = r#"<a href="/misc/terms.pdf">PDF</a><a href="/flyers/w42.pdf">Flyer</a>"#;
        let found = locator.locate_html(&base(), html).unwrap();
        assert_eq!(found.url.as_str(), "https://www.coles.com.au/flyers/w42.pdf");
    }

    #[test]
    fn test_catalogue_subpage() {
        let html = r##"
            <a href="#catalogue">skip</a>
            <a href="/catalogues">self</a>
            <a href="/shop/catalogue/nsw/weekly">NSW catalogue</a>"##;
        let sub = locator().catalogue_subpage_html(&base(), html).unwrap();
        assert_eq!(sub.as_str(), "https://www.coles.com.au/shop/catalogue/nsw/weekly");
    }
}
