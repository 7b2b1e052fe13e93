//! Document acquisition over HTTP (no browser needed once a URL is known).

pub mod http_client;

pub use http_client::{ContentCheck, DocumentFetcher};
