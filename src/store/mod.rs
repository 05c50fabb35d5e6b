//! Storage collaborator: the staging and canonical show tables.
//!
//! Components receive an `Arc<dyn ShowStore>` created once at startup by [`connect`]
//! and closed on shutdown; nothing reaches for a global connection.

pub mod memory;
pub mod postgres;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{CanonicalShow, ShowKey, ShowPayload, StagedShow};
use crate::query::{ShowPage, ShowQuery};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A single write against the canonical table, produced by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalWrite {
    /// Create a row for a natural key that has no canonical row yet.
    Insert(StagedShow),
    /// Overwrite the mutable attributes of an existing row.
    Update { id: i64, payload: ShowPayload },
}

#[async_trait]
pub trait ShowStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Upsert a batch of staged rows by natural key, all or nothing.
    async fn upsert_staged(&self, batch: &[StagedShow]) -> Result<(), StoreError>;

    /// Full staging snapshot, ordered by natural key.
    async fn staged_shows(&self) -> Result<Vec<StagedShow>, StoreError>;

    /// Canonical rows matching any of `keys`. Keys without a row are simply absent.
    async fn canonical_by_keys(&self, keys: &[ShowKey]) -> Result<Vec<CanonicalShow>, StoreError>;

    /// Apply a batch of canonical writes in one transaction.
    ///
    /// Inserts fail with [`StoreError::Conflict`] when the key already exists;
    /// updates only touch the row when the payload actually differs.
    async fn apply_canonical(&self, writes: &[CanonicalWrite]) -> Result<(), StoreError>;

    async fn query_canonical(&self, query: &ShowQuery) -> Result<ShowPage, StoreError>;

    /// Release connections. The store must not be used afterwards.
    async fn close(&self);
}

/// Connection settings for [`connect`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
    pub auto_migrate: bool,
    pub migrations_dir: PathBuf,
}

/// Open the backend selected by the URL scheme: `postgres://` / `postgresql://`,
/// or `memory:` for a process-local store.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn ShowStore>, StoreError> {
    let url = config.database_url.trim();
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = PgStore::connect(config).await?;
        Ok(Arc::new(store))
    } else if url == "memory:" || url == "memory" {
        Ok(Arc::new(MemoryStore::new()))
    } else {
        let scheme = url.split(':').next().unwrap_or_default();
        Err(StoreError::UnsupportedUrl(format!("scheme {scheme:?}")))
    }
}
