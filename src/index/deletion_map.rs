use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use crate::core::types::{DocId, LocalDocId};
use crate::storage::segment::SegmentId;

/// Deleted local doc ids of one segment.
///
/// The bitmap is copy-on-write: readers hold their own `Arc` and a later
/// `mark_deleted` clones before it sets a bit, so a reader never observes a
/// change after it was handed out.
#[derive(Debug)]
pub struct SegmentDeletion {
    pub doc_count: AtomicU32,
    bitmap: Mutex<Arc<RoaringBitmap>>,
}

impl SegmentDeletion {
    fn new(doc_count: u32, bitmap: Arc<RoaringBitmap>) -> Self {
        SegmentDeletion {
            doc_count: AtomicU32::new(doc_count),
            bitmap: Mutex::new(bitmap),
        }
    }

    pub fn bitmap(&self) -> Arc<RoaringBitmap> {
        self.bitmap.lock().clone()
    }
}

/// Writer-side deletion state for every segment of one partition view.
///
/// Deletions only ever accumulate. A map built for a new view inherits the
/// bitmap of every segment it shares with the previous one.
#[derive(Debug, Default)]
pub struct DeletionMap {
    segments: RwLock<BTreeMap<SegmentId, Arc<SegmentDeletion>>>,
}

impl DeletionMap {
    pub fn new() -> Self {
        DeletionMap {
            segments: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add_segment(&self, id: SegmentId, doc_count: u32) {
        let mut segments = self.segments.write();
        match segments.get(&id) {
            Some(existing) => {
                existing.doc_count.fetch_max(doc_count, Ordering::AcqRel);
            }
            None => {
                segments.insert(id, Arc::new(SegmentDeletion::new(doc_count, Arc::new(RoaringBitmap::new()))));
            }
        }
    }

    /// Registers `id` carrying over the deletions `previous` recorded for it.
    pub fn inherit_segment(&self, previous: &DeletionMap, id: SegmentId, doc_count: u32) {
        let bitmap = previous
            .segments
            .read()
            .get(&id)
            .map(|s| s.bitmap())
            .unwrap_or_else(|| Arc::new(RoaringBitmap::new()));
        self.segments
            .write()
            .insert(id, Arc::new(SegmentDeletion::new(doc_count, bitmap)));
    }

    /// Building segments grow after registration.
    pub fn extend_segment(&self, id: SegmentId, doc_count: u32) {
        self.add_segment(id, doc_count);
    }

    pub fn remove_segment(&self, id: SegmentId) {
        self.segments.write().remove(&id);
    }

    /// Marks one document deleted. Returns true when the bit was newly set.
    ///
    /// Out of range ids are a caller bug.
    pub fn mark_deleted(&self, id: SegmentId, local: LocalDocId) -> bool {
        let segments = self.segments.read();
        let Some(segment) = segments.get(&id) else {
            debug_assert!(false, "mark_deleted on unknown segment {}", id);
            return false;
        };
        debug_assert!(
            local < segment.doc_count.load(Ordering::Acquire),
            "doc {} out of range for segment {}", local, id
        );

        let mut bitmap = segment.bitmap.lock();
        if bitmap.contains(local) {
            return false;
        }
        Arc::make_mut(&mut *bitmap).insert(local);
        true
    }

    pub fn is_deleted(&self, id: SegmentId, local: LocalDocId) -> bool {
        self.segments
            .read()
            .get(&id)
            .map(|s| s.bitmap.lock().contains(local))
            .unwrap_or(false)
    }

    pub fn deleted_count(&self, id: SegmentId) -> u64 {
        self.segments
            .read()
            .get(&id)
            .map(|s| s.bitmap.lock().len())
            .unwrap_or(0)
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.read().keys().copied().collect()
    }

    /// Freezes the current state for a reader, laid out by `segments`
    /// (`(id, doc_count)` in doc id order).
    pub fn snapshot(&self, segments: &[(SegmentId, u32)]) -> DeletionMapReader {
        let map = self.segments.read();
        let parts = segments
            .iter()
            .map(|(id, doc_count)| {
                let bitmap = map
                    .get(id)
                    .map(|s| s.bitmap())
                    .unwrap_or_else(|| Arc::new(RoaringBitmap::new()));
                (*id, *doc_count, bitmap)
            })
            .collect();
        DeletionMapReader::from_parts(parts)
    }
}

/// Immutable deletion view owned by one reader snapshot.
#[derive(Debug, Clone, Default)]
pub struct DeletionMapReader {
    segments: Vec<SegmentDeletionView>,
    by_id: BTreeMap<SegmentId, usize>,
}

#[derive(Debug, Clone)]
struct SegmentDeletionView {
    id: SegmentId,
    base_doc_id: u64,
    doc_count: u32,
    bitmap: Arc<RoaringBitmap>,
}

impl DeletionMapReader {
    pub fn from_parts(parts: Vec<(SegmentId, u32, Arc<RoaringBitmap>)>) -> Self {
        let mut segments = Vec::with_capacity(parts.len());
        let mut by_id = BTreeMap::new();
        let mut base = 0u64;
        for (id, doc_count, bitmap) in parts {
            by_id.insert(id, segments.len());
            segments.push(SegmentDeletionView {
                id,
                base_doc_id: base,
                doc_count,
                bitmap,
            });
            base += doc_count as u64;
        }
        DeletionMapReader { segments, by_id }
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        let idx = self.segments.partition_point(|s| s.base_doc_id <= doc.0);
        if idx == 0 {
            return false;
        }
        let segment = &self.segments[idx - 1];
        let local = doc.0 - segment.base_doc_id;
        local < segment.doc_count as u64 && segment.bitmap.contains(local as u32)
    }

    pub fn is_deleted_local(&self, id: SegmentId, local: LocalDocId) -> bool {
        self.by_id
            .get(&id)
            .map(|&i| self.segments[i].bitmap.contains(local))
            .unwrap_or(false)
    }

    pub fn segment_bitmap(&self, id: SegmentId) -> Option<Arc<RoaringBitmap>> {
        self.by_id.get(&id).map(|&i| self.segments[i].bitmap.clone())
    }

    pub fn deleted_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.bitmap.len()).sum()
    }

    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.iter().map(|s| s.id)
    }
}
