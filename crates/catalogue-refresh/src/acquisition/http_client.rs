//! Async document download wrapping reqwest.
//!
//! One GET per call with a fixed timeout and a desktop browser identity. No
//! retries here: a failed fetch fails the run, and the next scheduled run is
//! the retry.

use crate::error::FetchError;
use crate::types::{CatalogueDocument, RetailerId};
use chrono::Utc;
use std::time::Duration;
use url::Url;

/// How far into the body the `%PDF-` header may appear.
const PDF_HEADER_WINDOW: usize = 1024;

/// What a downloaded body must look like to count as a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    /// Non-empty body carrying a `%PDF-` header near the start.
    Pdf,
    /// Any non-empty body.
    NonEmpty,
}

impl ContentCheck {
    /// PDF validation for the default document pattern, non-empty otherwise.
    pub fn for_pattern(document_pattern: &str) -> Self {
        if document_pattern.to_ascii_lowercase().contains("pdf") {
            Self::Pdf
        } else {
            Self::NonEmpty
        }
    }

    fn validate(self, url: &Url, body: &[u8]) -> Result<(), FetchError> {
        if body.is_empty() {
            return Err(FetchError::InvalidContent {
                url: url.to_string(),
                reason: "empty body".to_string(),
            });
        }
        if self == Self::Pdf {
            let window = &body[..body.len().min(PDF_HEADER_WINDOW)];
            if !window.windows(5).any(|w| w == b"%PDF-") {
                return Err(FetchError::InvalidContent {
                    url: url.to_string(),
                    reason: "missing %PDF- header".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// HTTP client for catalogue documents.
#[derive(Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
}

impl DocumentFetcher {
    /// Create a fetcher with the given timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            timeout,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// A fetcher with the same settings and its own connection pool, so
    /// concurrent retailer runs never share a client.
    pub fn for_run(&self) -> Result<Self, FetchError> {
        Self::new(self.timeout, &self.user_agent)
    }

    /// Perform a single GET and validate the body.
    pub async fn fetch(&self, url: &Url, check: ContentCheck) -> Result<Vec<u8>, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let resp = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(transport)?;
        check.validate(url, &body)?;

        tracing::debug!(
            "fetched {} ({:.2} MB)",
            url,
            body.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(body.to_vec())
    }

    /// Fetch and wrap the result as a [`CatalogueDocument`].
    pub async fn fetch_document(
        &self,
        retailer: &RetailerId,
        url: &Url,
        check: ContentCheck,
    ) -> Result<CatalogueDocument, FetchError> {
        let bytes = self.fetch(url, check).await?;
        Ok(CatalogueDocument {
            retailer: retailer.clone(),
            source_url: url.clone(),
            bytes,
            fetched_at: Utc::now(),
        })
    }
}
