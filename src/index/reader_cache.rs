use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use crate::core::error::Result;
use crate::storage::segment::SegmentId;

type CacheKey = (String, SegmentId, u64);

/// Per-segment reader parts of one snapshot.
///
/// Parts are keyed by (namespace, segment, doc count), so a building segment
/// that grew gets a fresh part while unchanged segments hand the hint
/// snapshot's `Arc` straight to the new one.
#[derive(Default)]
pub struct ReaderCache {
    entries: Mutex<HashMap<CacheKey, Arc<dyn Any + Send + Sync>>>,
    reused: AtomicU64,
    built: AtomicU64,
}

impl ReaderCache {
    pub fn new() -> Self {
        ReaderCache::default()
    }

    /// Starts a cache holding the parts of `hint` that belong to `live`
    /// `(segment, doc_count)` pairs.
    pub fn inherit(hint: &ReaderCache, live: &HashSet<(SegmentId, u64)>) -> Self {
        let entries = hint
            .entries
            .lock()
            .iter()
            .filter(|((_, id, count), _)| live.contains(&(*id, *count)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ReaderCache {
            entries: Mutex::new(entries),
            reused: AtomicU64::new(0),
            built: AtomicU64::new(0),
        }
    }

    pub fn get_or_build<T, F>(&self, namespace: &str, id: SegmentId, doc_count: u64, build: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        let key = (namespace.to_string(), id, doc_count);
        if let Some(part) = self.entries.lock().get(&key).cloned() {
            if let Ok(part) = part.downcast::<T>() {
                self.reused.fetch_add(1, Ordering::Relaxed);
                return Ok(part);
            }
        }

        // Built outside the lock; parallel index builds use distinct namespaces.
        let part = Arc::new(build()?);
        self.built.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(key, part.clone());
        Ok(part)
    }

    pub fn reused_count(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    pub fn built_count(&self) -> u64 {
        self.built.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherited_parts_are_shared_by_identity() {
        let hint = ReaderCache::new();
        let first: Arc<Vec<u32>> = hint.get_or_build("title", SegmentId(0), 3, || Ok(vec![1, 2, 3])).unwrap();
        hint.get_or_build("title", SegmentId(1), 5, || Ok(vec![9u32])).unwrap();

        let live: HashSet<_> = [(SegmentId(0), 3)].into_iter().collect();
        let cache = ReaderCache::inherit(&hint, &live);
        assert_eq!(cache.len(), 1);

        let again: Arc<Vec<u32>> = cache.get_or_build("title", SegmentId(0), 3, || Ok(Vec::new())).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.reused_count(), 1);
        assert_eq!(cache.built_count(), 0);
    }

    #[test]
    fn grown_segment_gets_new_part() {
        let cache = ReaderCache::new();
        let a: Arc<u64> = cache.get_or_build("pk", SegmentId(7), 1, || Ok(1)).unwrap();
        let b: Arc<u64> = cache.get_or_build("pk", SegmentId(7), 2, || Ok(2)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.built_count(), 2);
    }
}
