use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::SyncError;
use crate::model::ApiShow;
use crate::source::{parse_envelope, ShowSource};

/// Local JSON file holding a previously captured all-shows payload.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ShowSource for SnapshotSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            SyncError::SourceUnavailable(format!("reading {} failed: {e}", self.path.display()))
        })?;
        let shows = parse_envelope(&raw)?;
        info!(count = shows.len(), "loaded shows from snapshot");
        Ok(shows)
    }
}
