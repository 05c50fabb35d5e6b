//! Full sync: staging load followed by reconcile, guarded so only one run
//! is in flight per process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Instrument};

use crate::chunk::BatchSize;
use crate::error::SyncError;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::source::ShowSource;
use crate::staging::{StagingLoader, StagingReport};
use crate::store::ShowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub staging: StagingReport,
    pub reconcile: ReconcileReport,
    pub elapsed_ms: u64,
}

pub struct SyncService {
    source: Arc<dyn ShowSource>,
    loader: StagingLoader,
    reconciler: Reconciler,
    in_flight: Mutex<()>,
}

impl SyncService {
    pub fn new(store: Arc<dyn ShowStore>, source: Arc<dyn ShowSource>, batch_size: BatchSize) -> Self {
        Self {
            source,
            loader: StagingLoader::new(store.clone(), batch_size),
            reconciler: Reconciler::new(store, batch_size),
            in_flight: Mutex::new(()),
        }
    }

    /// Stage the current snapshot, then reconcile.
    ///
    /// Fails fast with [`SyncError::AlreadyRunning`] when another run holds the guard.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("sync", %run_id);
        async {
            let started = Instant::now();
            let staging = self.loader.load(self.source.as_ref()).await?;
            let reconcile = self.reconciler.run().await?;
            let report = SyncReport {
                staging,
                reconcile,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            info!(?report, "sync completed");
            Ok::<_, SyncError>(report)
        }
        .instrument(span)
        .await
    }

    /// Only the staging phase, under the same guard.
    pub async fn stage_only(&self) -> Result<StagingReport, SyncError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        self.loader.load(self.source.as_ref()).await
    }

    /// Only the reconcile phase, under the same guard.
    pub async fn reconcile_only(&self) -> Result<ReconcileReport, SyncError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SyncError::AlreadyRunning)?;
        self.reconciler.run().await
    }

    /// Run [`SyncService::run`] every `interval` until the task is dropped.
    /// The first run happens one interval after start.
    pub async fn run_every(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.run().await {
                Ok(_) => {}
                Err(SyncError::AlreadyRunning) => {
                    warn!("scheduled sync skipped: previous run still in progress");
                }
                Err(e) => error!(kind = e.kind(), error = %e, "scheduled sync failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiShow, Loose};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    fn api_show(movie: &str, title: &str) -> ApiShow {
        ApiShow {
            show_time: Some(Loose::Text("2030-01-01T10:00:00".into())),
            screen_name: Some(Loose::Text("A".into())),
            movie_id: Some(Loose::Text(movie.into())),
            title: Some(Loose::Text(title.into())),
            cinema_id: Some(Loose::Int(1)),
            ..ApiShow::default()
        }
    }

    struct FixedSource(std::sync::Mutex<Vec<ApiShow>>);

    impl FixedSource {
        fn set(&self, shows: Vec<ApiShow>) {
            *self.0.lock().unwrap() = shows;
        }
    }

    #[async_trait]
    impl ShowSource for FixedSource {
        fn describe(&self) -> String {
            "fixed".into()
        }
        async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    /// Blocks inside `fetch` until released, to hold the single-flight guard.
    struct GateSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ShowSource for GateSource {
        fn describe(&self) -> String {
            "gate".into()
        }
        async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    struct DownSource;

    #[async_trait]
    impl ShowSource for DownSource {
        fn describe(&self) -> String {
            "down".into()
        }
        async fn fetch(&self) -> Result<Vec<ApiShow>, SyncError> {
            Err(SyncError::SourceUnavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn end_to_end_update_of_changed_title() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(FixedSource(std::sync::Mutex::new(vec![api_show("M1", "Old")])));
        let service = SyncService::new(store.clone(), source.clone(), BatchSize::default());

        let first = service.run().await.unwrap();
        assert_eq!(first.reconcile.inserted, 1);

        source.set(vec![api_show("M1", "New")]);
        let second = service.run().await.unwrap();
        assert_eq!(second.staging.staged, 1);
        assert_eq!(second.reconcile.updated, 1);
        assert_eq!(second.reconcile.inserted, 0);

        let rows = store.canonical_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payload.title, "New");

        let third = service.run().await.unwrap();
        assert_eq!(third.reconcile.unchanged, 1);
        assert_eq!(third.reconcile.updated, 0);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let gate = Arc::new(GateSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let service = Arc::new(SyncService::new(store, gate.clone(), BatchSize::default()));

        let running = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });
        gate.entered.notified().await;

        let err = service.run().await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning));
        assert!(matches!(service.reconcile_only().await, Err(SyncError::AlreadyRunning)));

        gate.release.notify_one();
        running.await.unwrap().unwrap();
        service.reconcile_only().await.unwrap();
    }

    #[tokio::test]
    async fn source_failure_leaves_stores_untouched() {
        let store = Arc::new(MemoryStore::new());
        let service = SyncService::new(store.clone(), Arc::new(DownSource), BatchSize::default());
        let err = service.run().await.unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");
        assert!(store.staged_shows().await.unwrap().is_empty());
        assert!(store.canonical_rows().is_empty());
    }
}
