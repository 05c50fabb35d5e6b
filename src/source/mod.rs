//! Producers of raw upstream show records.
//!
//! Both the live endpoint and a local snapshot serve the same envelope,
//! `{ "data": { "allShows": [ApiShow, ..] } }`, so they share one parser.

pub mod http;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SyncError;
use crate::model::ApiShow;

pub use http::HttpSource;
pub use snapshot::SnapshotSource;

pub const DEFAULT_SOURCE_URL: &str = "https://api.cinepolisindia.com/api/movies/all-shows";
pub const DEFAULT_SNAPSHOT_PATH: &str = "./data/allShows.json";

#[async_trait]
pub trait ShowSource: Send + Sync {
    /// Human readable origin (URL or path) for logs.
    fn describe(&self) -> String;

    /// Fetch the complete current snapshot.
    async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError>;
}

/// Which source the staging loader reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Http { url: String, timeout: Duration },
    File { path: PathBuf },
}

impl SourceConfig {
    pub fn build(&self) -> Result<Arc<dyn ShowSource>, SyncError> {
        match self {
            SourceConfig::Http { url, timeout } => Ok(Arc::new(HttpSource::new(url, *timeout)?)),
            SourceConfig::File { path } => Ok(Arc::new(SnapshotSource::new(path.clone()))),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    #[serde(rename = "allShows")]
    all_shows: Vec<serde_json::Value>,
}

/// Parse an all-shows payload.
///
/// A body that does not match the envelope makes the source unreadable; a
/// record that does not match the record shape is malformed.
pub fn parse_envelope(body: &[u8]) -> Result<Vec<ApiShow>, SyncError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        SyncError::SourceUnavailable(format!("payload is not an allShows envelope: {e}"))
    })?;
    envelope
        .data
        .all_shows
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            serde_json::from_value::<ApiShow>(raw).map_err(|e| SyncError::MalformedRecord {
                index,
                field: "record",
                reason: e.to_string(),
            })
        })
        .collect()
}

pub(crate) fn truncate_for_log(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
