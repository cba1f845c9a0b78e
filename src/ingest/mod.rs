// src/ingest/mod.rs
//! Fetcher/Normalizer leaf: payload parsing, record normalization and the
//! [`fetcher::Fetcher`] transports.

pub mod feed;
pub mod fetcher;
pub mod normalize;

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::model::{IntelItem, SourceDescriptor};

pub use fetcher::{Fetcher, FixtureFetcher, HttpFetcher};

/// Parse one payload and normalize its entries for `source`.
/// `fetched_at` is both the retrieval stamp and the publish-time fallback.
pub fn parse_and_normalize(
    source: &SourceDescriptor,
    payload: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<IntelItem>, ParseError> {
    let entries = feed::parse_feed(payload)?;
    Ok(normalize::normalize_entries(source, entries, fetched_at))
}
