//! Reconciler: bring the canonical table in line with the staging table.
//!
//! Every staged row is classified as exactly one of insert, update or
//! unchanged. Writes for a batch are applied in one transaction; a failing
//! batch rolls back on its own while earlier batches stay committed, and a
//! re-run picks up where the data left off because classification is
//! idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::chunk::{chunk, BatchSize};
use crate::error::SyncError;
use crate::model::{CanonicalShow, ShowKey, StagedShow};
use crate::store::{CanonicalWrite, ShowStore};

/// Outcome for one staged row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Insert,
    Update { id: i64 },
    Unchanged,
}

/// Classify a staged row against its canonical counterpart, if any.
pub fn classify(staged: &StagedShow, canonical: Option<&CanonicalShow>) -> Decision {
    match canonical {
        None => Decision::Insert,
        Some(row) if row.payload != staged.payload => Decision::Update { id: row.id },
        Some(_) => Decision::Unchanged,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Batches whose writes were committed.
    pub batches: usize,
}

impl ReconcileReport {
    fn absorb(&mut self, other: &BatchPlan) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Writes and counts for one batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub writes: Vec<CanonicalWrite>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Build the writes for a batch given the canonical rows found for its keys.
pub fn plan_batch(batch: &[StagedShow], existing: &[CanonicalShow]) -> BatchPlan {
    let by_key: HashMap<&ShowKey, &CanonicalShow> =
        existing.iter().map(|row| (&row.key, row)).collect();

    let mut plan = BatchPlan::default();
    for staged in batch {
        match classify(staged, by_key.get(&staged.key).copied()) {
            Decision::Insert => {
                plan.writes.push(CanonicalWrite::Insert(staged.clone()));
                plan.inserted += 1;
            }
            Decision::Update { id } => {
                plan.writes.push(CanonicalWrite::Update {
                    id,
                    payload: staged.payload.clone(),
                });
                plan.updated += 1;
            }
            Decision::Unchanged => plan.unchanged += 1,
        }
    }
    plan
}

pub struct Reconciler {
    store: Arc<dyn ShowStore>,
    batch_size: BatchSize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ShowStore>, batch_size: BatchSize) -> Self {
        Self { store, batch_size }
    }

    #[instrument(skip(self), fields(batch_size = %self.batch_size))]
    pub async fn run(&self) -> Result<ReconcileReport, SyncError> {
        info!("reconciling staged shows into canonical shows");
        let staged = self.store.staged_shows().await?;

        let mut report = ReconcileReport::default();
        for (index, batch) in chunk(&staged, self.batch_size).enumerate() {
            let keys: Vec<ShowKey> = batch.iter().map(|s| s.key.clone()).collect();
            let existing = self.store.canonical_by_keys(&keys).await?;
            let plan = plan_batch(batch, &existing);

            if !plan.writes.is_empty() {
                if let Err(e) = self.store.apply_canonical(&plan.writes).await {
                    error!(
                        batch = index + 1,
                        committed_batches = report.batches,
                        error = %e,
                        "canonical batch rolled back"
                    );
                    return Err(e.into());
                }
                report.batches += 1;
            }
            report.absorb(&plan);
            info!(
                batch = index + 1,
                inserted = plan.inserted,
                updated = plan.updated,
                unchanged = plan.unchanged,
                total_inserted = report.inserted,
                total_updated = report.updated,
                total_unchanged = report.unchanged,
                "canonical batch reconciled"
            );
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            "done reconciling"
        );
        Ok(report)
    }
}
