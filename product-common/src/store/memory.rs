use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::product::{ProductRecord, ProductStatus};
use crate::store::{RecordStore, StoreError, StoreResult, DEFAULT_PAGE_SIZE};

/// A RecordStore kept in process memory.
///
/// Used for local development and tests. Failures can be injected per id, or for the whole
/// store, to exercise per-record isolation in the stages.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, ProductRecord>>,
    failing_gets: RwLock<HashSet<String>>,
    failing_upserts: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
    upserts: AtomicUsize,
    page_size: Option<u32>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size: Some(page_size),
            ..Default::default()
        }
    }

    /// Seed records without counting them as upserts.
    pub fn with_records(records: impl IntoIterator<Item = ProductRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.write() {
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Make every lookup of `id` fail from now on.
    pub fn fail_gets_for(&self, id: &str) {
        if let Ok(mut failing) = self.failing_gets.write() {
            failing.insert(id.to_owned());
        }
    }

    /// Make every upsert of `id` fail from now on.
    pub fn fail_upserts_for(&self, id: &str) {
        if let Ok(mut failing) = self.failing_upserts.write() {
            failing.insert(id.to_owned());
        }
    }

    /// Make every operation fail, or recover.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful upserts so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Snapshot of a stored record, bypassing failure injection.
    pub fn snapshot(&self, id: &str) -> Option<ProductRecord> {
        self.records.read().ok()?.get(id).cloned()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store marked unavailable".to_owned()));
        }
        Ok(())
    }

    fn page<F>(&self, after: Option<&str>, limit: u32, keep: F) -> StoreResult<Vec<ProductRecord>>
    where
        F: Fn(&ProductRecord) -> bool,
    {
        self.check_available()?;
        let records = self.records.read().map_err(poisoned)?;

        Ok(records
            .values()
            .filter(|record| after.map_or(true, |after| record.id.as_str() > after))
            .filter(|record| keep(*record))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("poisoned MemoryRecordStore lock".to_owned())
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: &str) -> StoreResult<Option<ProductRecord>> {
        self.check_available()?;
        if self.failing_gets.read().map_err(poisoned)?.contains(id) {
            return Err(StoreError::Unavailable(format!("lookup of {} rejected", id)));
        }
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(id).cloned())
    }

    async fn upsert(&self, record: &ProductRecord) -> StoreResult<()> {
        self.check_available()?;
        if self.failing_upserts.read().map_err(poisoned)?.contains(&record.id) {
            return Err(StoreError::Unavailable(format!(
                "upsert of {} rejected",
                record.id
            )));
        }

        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.id.clone(), record.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_by_status_page(
        &self,
        statuses: &[ProductStatus],
        after: Option<&str>,
        limit: u32,
    ) -> StoreResult<Vec<ProductRecord>> {
        self.page(after, limit, |record| {
            record
                .status
                .map_or(false, |status| statuses.contains(&status))
        })
    }

    async fn list_page(&self, after: Option<&str>, limit: u32) -> StoreResult<Vec<ProductRecord>> {
        self.page(after, limit, |_| true)
    }

    fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}
