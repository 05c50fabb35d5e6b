use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{CanonicalShow, ShowKey, ShowPayload, StagedShow};
use crate::query::{ShowPage, ShowQuery};
use crate::store::{CanonicalWrite, ShowStore};

/// Process-local store with the same constraints as the SQL schema: unique
/// natural keys in both tables, surrogate ids that never change, and batches
/// that apply completely or not at all.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    staged: BTreeMap<ShowKey, ShowPayload>,
    canonical: BTreeMap<ShowKey, (i64, ShowPayload)>,
    canonical_ids: HashMap<i64, ShowKey>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every canonical row, ordered by natural key.
    pub fn canonical_rows(&self) -> Vec<CanonicalShow> {
        let t = self.tables();
        t.canonical
            .iter()
            .map(|(key, (id, payload))| CanonicalShow {
                id: *id,
                key: key.clone(),
                payload: payload.clone(),
            })
            .collect()
    }
}

impl Tables {
    fn insert_canonical(&mut self, show: &StagedShow) {
        self.next_id += 1;
        let id = self.next_id;
        self.canonical_ids.insert(id, show.key.clone());
        self.canonical
            .insert(show.key.clone(), (id, show.payload.clone()));
    }
}

#[async_trait]
impl ShowStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_staged(&self, batch: &[StagedShow]) -> Result<(), StoreError> {
        let mut t = self.tables();
        for show in batch {
            t.staged.insert(show.key.clone(), show.payload.clone());
        }
        Ok(())
    }

    async fn staged_shows(&self) -> Result<Vec<StagedShow>, StoreError> {
        let t = self.tables();
        Ok(t.staged
            .iter()
            .map(|(key, payload)| StagedShow {
                key: key.clone(),
                payload: payload.clone(),
            })
            .collect())
    }

    async fn canonical_by_keys(&self, keys: &[ShowKey]) -> Result<Vec<CanonicalShow>, StoreError> {
        let t = self.tables();
        Ok(keys
            .iter()
            .filter_map(|key| {
                t.canonical.get(key).map(|(id, payload)| CanonicalShow {
                    id: *id,
                    key: key.clone(),
                    payload: payload.clone(),
                })
            })
            .collect())
    }

    async fn apply_canonical(&self, writes: &[CanonicalWrite]) -> Result<(), StoreError> {
        let mut t = self.tables();

        // Validate the whole batch before touching anything.
        let mut pending_keys = std::collections::HashSet::new();
        for write in writes {
            match write {
                CanonicalWrite::Insert(show) => {
                    if t.canonical.contains_key(&show.key) || !pending_keys.insert(&show.key) {
                        return Err(StoreError::Conflict(format!(
                            "canonical row already exists for {:?}",
                            show.key
                        )));
                    }
                }
                CanonicalWrite::Update { id, .. } => {
                    if !t.canonical_ids.contains_key(id) {
                        return Err(StoreError::Conflict(format!("no canonical row with id {id}")));
                    }
                }
            }
        }

        for write in writes {
            match write {
                CanonicalWrite::Insert(show) => t.insert_canonical(show),
                CanonicalWrite::Update { id, payload } => {
                    let Some(key) = t.canonical_ids.get(id).cloned() else {
                        continue;
                    };
                    if let Some((_, current)) = t.canonical.get_mut(&key) {
                        if current != payload {
                            *current = payload.clone();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn query_canonical(&self, query: &ShowQuery) -> Result<ShowPage, StoreError> {
        let t = self.tables();
        let mut matching: Vec<CanonicalShow> = t
            .canonical
            .iter()
            .map(|(key, (id, payload))| CanonicalShow {
                id: *id,
                key: key.clone(),
                payload: payload.clone(),
            })
            .filter(|row| query.matches(row))
            .collect();
        matching.sort_by(|a, b| {
            a.key
                .show_time
                .cmp(&b.key.show_time)
                .then_with(|| a.key.cmp(&b.key))
        });

        let total = matching.len() as i64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let rows = matching
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .collect();
        Ok(ShowPage { total, rows })
    }

    async fn close(&self) {}
}
