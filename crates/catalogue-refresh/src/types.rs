//! Core data types shared by every stage of a catalogue refresh.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Identifier of one configured retailer (e.g. `coles`, `woolworths`).
///
/// Always a lowercase slug of `[a-z0-9_-]`, so it is safe to use as a
/// directory name and as the `store_name` column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RetailerId(String);

impl RetailerId {
    /// Parse a retailer id, rejecting anything that is not a lowercase slug.
    pub fn parse(raw: &str) -> Result<Self, InvalidRetailerId> {
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidRetailerId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RetailerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RetailerId {
    type Error = InvalidRetailerId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RetailerId> for String {
    fn from(id: RetailerId) -> Self {
        id.0
    }
}

/// A retailer id that is not a lowercase slug.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid retailer id {0:?}: expected a lowercase slug of [a-z0-9_-]")]
pub struct InvalidRetailerId(pub String);

/// A downloaded catalogue document. Lives only for the duration of one run.
#[derive(Debug, Clone)]
pub struct CatalogueDocument {
    pub retailer: RetailerId,
    pub source_url: Url,
    pub bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

/// One rasterized page of a catalogue document.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page index; a sequence is contiguous with no gaps.
    pub index: u32,
    /// Encoded JPEG bytes.
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A published page image and the store record that points at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub retailer: RetailerId,
    pub page_index: u32,
    /// Public reference path, `/catalogue_images/{retailer}/{date}_page{n}.jpg`.
    pub reference_path: String,
    pub week_date: NaiveDate,
}

impl PublishedArtifact {
    /// Build the artifact for `page_index` of a snapshot published on `week_date`.
    pub fn new(retailer: &RetailerId, page_index: u32, week_date: NaiveDate) -> Self {
        Self {
            retailer: retailer.clone(),
            page_index,
            reference_path: format!(
                "/{}/{}/{}",
                PUBLIC_PREFIX,
                retailer,
                artifact_file_name(week_date, page_index)
            ),
            week_date,
        }
    }

    /// File name component of the reference path.
    pub fn file_name(&self) -> String {
        artifact_file_name(self.week_date, self.page_index)
    }
}

/// Top-level directory (under the publish root) and URL prefix for images.
pub const PUBLIC_PREFIX: &str = "catalogue_images";

/// `{YYYYMMDD}_page{n}.jpg`
pub fn artifact_file_name(week_date: NaiveDate, page_index: u32) -> String {
    format!("{}_page{}.jpg", week_date.format("%Y%m%d"), page_index)
}

/// The complete set of artifacts for one retailer at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueSnapshot {
    pub retailer: RetailerId,
    pub week_date: NaiveDate,
    pub artifacts: Vec<PublishedArtifact>,
    /// Files from earlier snapshots (or orphans) removed by the sweep.
    pub stale_removed: usize,
    /// Stale files the sweep could not remove; reclaimed by a later run.
    pub stale_remaining: usize,
}

impl CatalogueSnapshot {
    pub fn page_count(&self) -> usize {
        self.artifacts.len()
    }
}
