//! Staging loader: pull a snapshot from the configured source and upsert it
//! into the staging table, one atomic batch at a time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::chunk::{chunk, BatchSize};
use crate::error::SyncError;
use crate::model::{ApiShow, ShowKey, StagedShow};
use crate::source::ShowSource;
use crate::store::ShowStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagingReport {
    /// Records delivered by the source.
    pub received: usize,
    /// Distinct natural keys written.
    pub staged: usize,
    /// Batches committed.
    pub batches: usize,
}

pub struct StagingLoader {
    store: Arc<dyn ShowStore>,
    batch_size: BatchSize,
}

impl StagingLoader {
    pub fn new(store: Arc<dyn ShowStore>, batch_size: BatchSize) -> Self {
        Self { store, batch_size }
    }

    /// Fetch the current snapshot from `source` and stage it.
    #[instrument(skip(self, source), fields(source = %source.describe()))]
    pub async fn load(&self, source: &dyn ShowSource) -> Result<StagingReport, SyncError> {
        info!("loading shows from source");
        let records = source.fetch().await?;
        info!(count = records.len(), "loaded shows");
        self.stage(records).await
    }

    /// Normalize and upsert already fetched records.
    ///
    /// Every record is normalized before the first write, so a malformed
    /// record aborts the run with the staging table untouched.
    pub async fn stage(&self, records: Vec<ApiShow>) -> Result<StagingReport, SyncError> {
        let received = records.len();
        let shows = normalize_all(records)?;

        let mut batches = 0usize;
        for batch in chunk(&shows, self.batch_size) {
            self.store.upsert_staged(batch).await?;
            batches += 1;
            info!(
                batch = batches,
                rows = batch.len(),
                "staging batch committed"
            );
        }

        let report = StagingReport {
            received,
            staged: shows.len(),
            batches,
        };
        info!(?report, "sync table updated successfully");
        Ok(report)
    }
}

/// Normalize every record; a later record with the same natural key replaces
/// the earlier one in place, as sequential upserts would.
fn normalize_all(records: Vec<ApiShow>) -> Result<Vec<StagedShow>, SyncError> {
    let mut out: Vec<StagedShow> = Vec::with_capacity(records.len());
    let mut seen: HashMap<ShowKey, usize> = HashMap::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let show = record.normalize(index)?;
        match seen.get(&show.key) {
            Some(&pos) => out[pos] = show,
            None => {
                seen.insert(show.key.clone(), out.len());
                out.push(show);
            }
        }
    }
    Ok(out)
}
