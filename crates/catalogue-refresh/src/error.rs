//! Error types for every stage of a refresh run.
//!
//! Stage-local errors ([`FetchError`], [`RasterError`], [`PublishError`],
//! [`StoreError`]) are wrapped by [`RefreshError`], which is what a failed
//! pipeline reports. [`ErrorKind`] flattens them into the reporting vocabulary
//! used by logs, the run ledger and the CLI.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Failure to download a located document.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("transport error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("unexpected content from {url}: {reason}")]
    InvalidContent { url: String, reason: String },
}

/// Failure to turn document bytes into page images.
#[derive(thiserror::Error, Debug)]
pub enum RasterError {
    #[error("document is empty")]
    Empty,

    #[error("document could not be parsed: {0}")]
    Malformed(String),

    #[error("rasterizer failed on page {page}: {reason}")]
    Internal { page: u32, reason: String },
}

/// Failure inside the relational store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("failed to prepare store location {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure of the atomic-replace protocol.
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("page sequence is not publishable: {0}")]
    InvalidSequence(String),

    #[error("failed to write {path}: {source}")]
    FilesystemWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("store write failed: {0}")]
    StoreWrite(#[source] StoreError),
}

/// Why a retailer run ended in `Failed`.
#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error("no catalogue document found on {page}")]
    DiscoveryNotFound { page: String },

    #[error("browser session failed: {0}")]
    Browser(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("run cancelled")]
    Cancelled,
}

/// Flat classification of a [`RefreshError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    DiscoveryNotFound,
    BrowserError,
    FetchTransportError,
    FetchStatusError,
    InvalidContent,
    RasterError,
    FilesystemWriteError,
    StoreWriteError,
    ConfigError,
    InternalError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DiscoveryNotFound => "DiscoveryNotFound",
            Self::BrowserError => "BrowserError",
            Self::FetchTransportError => "FetchTransportError",
            Self::FetchStatusError => "FetchStatusError",
            Self::InvalidContent => "InvalidContent",
            Self::RasterError => "RasterError",
            Self::FilesystemWriteError => "FilesystemWriteError",
            Self::StoreWriteError => "StoreWriteError",
            Self::ConfigError => "ConfigError",
            Self::InternalError => "InternalError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl RefreshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DiscoveryNotFound { .. } => ErrorKind::DiscoveryNotFound,
            Self::Browser(_) => ErrorKind::BrowserError,
            Self::Fetch(FetchError::Transport { .. }) => ErrorKind::FetchTransportError,
            Self::Fetch(FetchError::Status { .. }) => ErrorKind::FetchStatusError,
            Self::Fetch(FetchError::InvalidContent { .. }) => ErrorKind::InvalidContent,
            Self::Raster(_) => ErrorKind::RasterError,
            // An unpublishable sequence is caught before any write; it is a
            // rasterizer defect from the caller's point of view.
            Self::Publish(PublishError::InvalidSequence(_)) => ErrorKind::RasterError,
            Self::Publish(PublishError::FilesystemWrite { .. }) => ErrorKind::FilesystemWriteError,
            Self::Publish(PublishError::StoreWrite(_)) => ErrorKind::StoreWriteError,
            Self::Config(_) => ErrorKind::ConfigError,
            Self::Internal(_) => ErrorKind::InternalError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// HTTP status for `FetchStatusError` failures.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Fetch(FetchError::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }
}
