use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::debug;

use super::fetcher::{FetchBatch, FetchRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbols: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
}

impl From<&FetchRequest> for CacheKey {
    fn from(request: &FetchRequest) -> Self {
        let mut symbols: Vec<String> = request.symbols.iter().map(|s| s.to_uppercase()).collect();
        symbols.sort();
        symbols.dedup();
        CacheKey {
            symbols,
            start: request.start,
            end: request.end,
        }
    }
}

/// Memoised fetch results keyed by (symbol set, start, end).
///
/// Symbol order does not matter. Batches with failures are never stored,
/// so a transient outage is retried on the next request.
#[derive(Default)]
pub struct FetchCache {
    entries: DashMap<CacheKey, Arc<FetchBatch>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, request: &FetchRequest) -> Option<Arc<FetchBatch>> {
        let hit = self.entries.get(&CacheKey::from(request)).map(|e| Arc::clone(e.value()));
        if hit.is_some() {
            debug!("Fetch cache hit for {:?}", request.symbols);
        }
        hit
    }

    /// Store a batch. Returns the shared handle either way.
    pub fn insert(&self, request: &FetchRequest, batch: FetchBatch) -> Arc<FetchBatch> {
        let batch = Arc::new(batch);
        if batch.failures.is_empty() {
            self.entries.insert(CacheKey::from(request), Arc::clone(&batch));
        }
        batch
    }

    /// Drop the entry for one request. Returns whether anything was removed.
    pub fn invalidate(&self, request: &FetchRequest) -> bool {
        self.entries.remove(&CacheKey::from(request)).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
