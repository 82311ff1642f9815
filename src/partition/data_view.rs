use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info};
use crate::core::error::{Error, Result};
use crate::core::types::Locator;
use crate::index::index_reader::SegmentSource;
use crate::storage::layout::StorageLayout;
use crate::storage::operation_log::{OperationEntry, OperationLog};
use crate::storage::segment::{SegmentData, SegmentId, SegmentKind};
use crate::storage::segment_writer::write_segment_dir;
use crate::storage::version::{list_version_ids, Version};

/// Where a segment's payload currently lives.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentStorage {
    OnDisk(PathBuf),
    InMemory,
    Linked(PathBuf), // Realtime segment persisted under the realtime root
}

/// One segment of a view plus the realtime operations it hosts.
///
/// `storage` is shared by every view holding the segment, so a dump that
/// finishes later is visible to all of them.
#[derive(Debug, Clone)]
pub struct ViewSegment {
    pub data: Arc<SegmentData>,
    pub kind: SegmentKind,
    pub storage: Arc<RwLock<SegmentStorage>>,
    pub operations: Arc<Vec<OperationEntry>>,
}

impl ViewSegment {
    pub fn on_disk(data: Arc<SegmentData>, path: PathBuf) -> Self {
        ViewSegment {
            data,
            kind: SegmentKind::Built,
            storage: Arc::new(RwLock::new(SegmentStorage::OnDisk(path))),
            operations: Arc::new(Vec::new()),
        }
    }

    pub fn linked(data: Arc<SegmentData>, path: PathBuf, operations: Vec<OperationEntry>) -> Self {
        ViewSegment {
            data,
            kind: SegmentKind::Realtime,
            storage: Arc::new(RwLock::new(SegmentStorage::Linked(path))),
            operations: Arc::new(operations),
        }
    }

    pub fn id(&self) -> SegmentId {
        self.data.id()
    }

    pub fn doc_count(&self) -> u64 {
        self.data.doc_count()
    }

    pub fn is_in_memory(&self) -> bool {
        *self.storage.read() == SegmentStorage::InMemory
    }

    pub fn is_linked(&self) -> bool {
        matches!(*self.storage.read(), SegmentStorage::Linked(_))
    }
}

/// Writes a realtime segment and its operations under the realtime root and
/// flips its storage to linked. Returns false when it was not in memory.
///
/// The storage lock is held for the whole write so the dump thread and a
/// watermark link never write the same directory at once.
pub fn link_segment(layout: &StorageLayout, segment: &ViewSegment) -> Result<bool> {
    let mut storage = segment.storage.write();
    if *storage != SegmentStorage::InMemory {
        return Ok(false);
    }
    let path = layout.realtime_segment_path(segment.id());
    write_segment_dir(&path, &segment.data)?;
    OperationLog::write_all(&path, &segment.operations)?;
    debug!(segment = %segment.id(), path = %path.display(), "linked realtime segment");
    *storage = SegmentStorage::Linked(path);
    Ok(true)
}

/// The ordered segment set one snapshot is built from: the on-disk segments
/// of `version`, then the realtime chain, then the building segment.
#[derive(Debug, Clone)]
pub struct PartitionDataView {
    pub version: Version,
    pub on_disk: Vec<ViewSegment>,
    pub realtime: Vec<ViewSegment>,
    pub building: Option<ViewSegment>,
}

impl PartitionDataView {
    pub fn build(
        version: Version,
        on_disk: Vec<ViewSegment>,
        realtime: Vec<ViewSegment>,
        building: Option<ViewSegment>,
    ) -> Result<Self> {
        let on_disk_ids: Vec<SegmentId> = on_disk.iter().map(|s| s.id()).collect();
        if on_disk_ids != version.segment_ids {
            return Err(Error::inconsistent(format!(
                "view of version {} holds segments {:?}, version lists {:?}",
                version.version_id, on_disk_ids, version.segment_ids
            )));
        }
        if let Some(id) = on_disk_ids.iter().find(|id| id.is_realtime()) {
            return Err(Error::inconsistent(format!("on-disk segment {} carries the realtime tag", id)));
        }

        let mut previous: Option<SegmentId> = None;
        for segment in realtime.iter().chain(building.iter()) {
            let id = segment.id();
            if !id.is_realtime() {
                return Err(Error::inconsistent(format!("realtime segment {} lacks the realtime tag", id)));
            }
            if previous.is_some_and(|p| p >= id) {
                return Err(Error::inconsistent(format!("realtime segment {} out of order", id)));
            }
            previous = Some(id);
        }

        Ok(PartitionDataView {
            version,
            on_disk,
            realtime,
            building,
        })
    }

    pub fn segments(&self) -> impl Iterator<Item = &ViewSegment> {
        self.on_disk.iter().chain(self.realtime.iter()).chain(self.building.iter())
    }

    pub fn segment(&self, id: SegmentId) -> Option<&ViewSegment> {
        self.segments().find(|s| s.id() == id)
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments().map(|s| s.id()).collect()
    }

    pub fn doc_count(&self) -> u64 {
        self.segments().map(|s| s.doc_count()).sum()
    }

    /// `(segment, first global doc id)` in doc id order.
    pub fn base_doc_ids(&self) -> Vec<(SegmentId, u64)> {
        let mut base = 0u64;
        self.segments()
            .map(|s| {
                let entry = (s.id(), base);
                base += s.doc_count();
                entry
            })
            .collect()
    }

    /// Layout handed to the deletion map snapshot.
    pub fn deletion_layout(&self) -> Vec<(SegmentId, u32)> {
        self.segments().map(|s| (s.id(), s.doc_count() as u32)).collect()
    }

    pub fn segment_sources(&self) -> Vec<SegmentSource> {
        let mut base = 0u64;
        self.segments()
            .map(|s| {
                let source = SegmentSource {
                    id: s.id(),
                    kind: s.kind,
                    base_doc_id: base,
                    data: s.data.clone(),
                };
                base += s.doc_count();
                source
            })
            .collect()
    }

    /// Sub partition sources, aligned one to one with `segment_sources`.
    /// Segments without sub documents contribute an empty segment.
    pub fn sub_segment_sources(&self) -> Vec<SegmentSource> {
        let mut base = 0u64;
        self.segments()
            .map(|s| {
                let data = s.data.sub_segment.clone().unwrap_or_else(|| {
                    let mut info = s.data.info.clone();
                    info.doc_count = 0;
                    Arc::new(SegmentData::new(info, Vec::new(), Vec::new(), None, Vec::new()))
                });
                let source = SegmentSource {
                    id: s.id(),
                    kind: s.kind,
                    base_doc_id: base,
                    data,
                };
                base += source.doc_count();
                source
            })
            .collect()
    }

    /// Bytes held by realtime segments that are not yet linked, building
    /// segment included.
    pub fn realtime_memory_use(&self) -> usize {
        self.realtime
            .iter()
            .filter(|s| s.is_in_memory())
            .chain(self.building.iter())
            .map(|s| s.data.memory_use())
            .sum()
    }

    /// Persists in-memory realtime segments up to and including `up_to` and
    /// flips them to linked storage.
    ///
    /// A failure here leaves the view in an unknown state on disk and is
    /// reported as inconsistent.
    pub fn switch_realtime_to_linked(&self, layout: &StorageLayout, up_to: SegmentId) -> Result<usize> {
        let mut linked = 0;
        for segment in self.realtime.iter().filter(|s| s.id() <= up_to) {
            let done = link_segment(layout, segment).map_err(|e| {
                Error::inconsistent(format!("linking realtime segment {} failed: {}", segment.id(), e))
            })?;
            if done {
                linked += 1;
            }
        }
        if linked > 0 {
            info!(linked, up_to = %up_to, "switched realtime segments to linked storage");
        }
        Ok(linked)
    }

    /// Restricts the view to `ids`, keeping order.
    pub fn sub_view(&self, ids: &HashSet<SegmentId>) -> PartitionDataView {
        let keep = |segments: &[ViewSegment]| -> Vec<ViewSegment> {
            segments.iter().filter(|s| ids.contains(&s.id())).cloned().collect()
        };
        let on_disk = keep(&self.on_disk);
        let mut version = self.version.clone();
        version.segment_ids = on_disk.iter().map(|s| s.id()).collect();
        PartitionDataView {
            version,
            on_disk,
            realtime: keep(&self.realtime),
            building: self.building.clone().filter(|b| ids.contains(&b.id())),
        }
    }
}

/// Persisted description of the linked realtime chain.
///
/// Stored as a `Version` under the realtime root: `segment_ids` holds the
/// on-disk segments the chain was reconciled against followed by the linked
/// realtime segments, which the realtime tag keeps apart.
pub struct RealtimeMarker;

impl RealtimeMarker {
    pub fn store(
        layout: &StorageLayout,
        base: &Version,
        linked: &[SegmentId],
        locator: Option<Locator>,
    ) -> Result<i64> {
        let next_id = list_version_ids(&layout.realtime_root)?
            .last()
            .map(|id| id + 1)
            .unwrap_or(0);
        let mut segment_ids = base.segment_ids.clone();
        segment_ids.extend_from_slice(linked);

        let mut marker = Version::new(
            next_id,
            segment_ids,
            base.schema_version_id,
            locator.map(|l| l.offset).unwrap_or(base.timestamp),
        );
        marker.locator = locator;
        marker.format_version = base.format_version;
        marker.store(&layout.realtime_root)?;
        debug!(marker = next_id, realtime_segments = linked.len(), "stored realtime marker");
        Ok(next_id)
    }

    /// `(base on-disk segments, linked realtime segments)` of a marker.
    pub fn split(marker: &Version) -> (Vec<SegmentId>, Vec<SegmentId>) {
        marker.segment_ids.iter().copied().partition(|id| !id.is_realtime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::segment::{SegmentInfo, StoredDocument};
    use std::collections::HashMap;

    fn data(id: SegmentId, kind: SegmentKind, docs: usize) -> Arc<SegmentData> {
        let documents = (0..docs)
            .map(|i| StoredDocument {
                primary_key: format!("{}-{}", id, i),
                timestamp: 1,
                fields: HashMap::new(),
            })
            .collect();
        Arc::new(SegmentData::new(SegmentInfo::new(id, kind, 0), documents, Vec::new(), None, Vec::new()))
    }

    fn in_memory(id: SegmentId, docs: usize) -> ViewSegment {
        ViewSegment {
            data: data(id, SegmentKind::Realtime, docs),
            kind: SegmentKind::Realtime,
            storage: Arc::new(RwLock::new(SegmentStorage::InMemory)),
            operations: Arc::new(Vec::new()),
        }
    }

    #[test]
    fn bases_follow_segment_order() {
        let version = Version::new(0, vec![SegmentId(0), SegmentId(1)], 0, 1);
        let view = PartitionDataView::build(
            version,
            vec![
                ViewSegment::on_disk(data(SegmentId(0), SegmentKind::Built, 2), PathBuf::new()),
                ViewSegment::on_disk(data(SegmentId(1), SegmentKind::Built, 3), PathBuf::new()),
            ],
            vec![in_memory(SegmentId::realtime(0), 1)],
            None,
        )
        .unwrap();

        assert_eq!(
            view.base_doc_ids(),
            vec![(SegmentId(0), 0), (SegmentId(1), 2), (SegmentId::realtime(0), 5)]
        );
        assert_eq!(view.doc_count(), 6);
        assert!(view.realtime_memory_use() > 0);
    }

    #[test]
    fn rejects_untagged_realtime_segment() {
        let err = PartitionDataView::build(Version::empty(), Vec::new(), vec![in_memory(SegmentId(4), 1)], None)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::InconsistentState);
    }

    #[test]
    fn linking_persists_and_flips_storage() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let first = in_memory(SegmentId::realtime(0), 2);
        let second = in_memory(SegmentId::realtime(1), 1);
        let view = PartitionDataView::build(Version::empty(), Vec::new(), vec![first, second], None).unwrap();

        let linked = view.switch_realtime_to_linked(&layout, SegmentId::realtime(0)).unwrap();
        assert_eq!(linked, 1);
        assert!(view.realtime[0].is_linked());
        assert!(view.realtime[1].is_in_memory());
        assert!(layout.realtime_segment_path(SegmentId::realtime(0)).exists());
        assert_eq!(view.realtime_memory_use(), view.realtime[1].data.memory_use());
    }

    #[test]
    fn marker_splits_base_and_chain() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let base = Version::new(3, vec![SegmentId(0), SegmentId(2)], 0, 10);
        let id = RealtimeMarker::store(&layout, &base, &[SegmentId::realtime(4)], Some(Locator::new(1, 12))).unwrap();

        let marker = Version::load_id(&layout.realtime_root, id).unwrap();
        let (disk, chain) = RealtimeMarker::split(&marker);
        assert_eq!(disk, vec![SegmentId(0), SegmentId(2)]);
        assert_eq!(chain, vec![SegmentId::realtime(4)]);
        assert_eq!(marker.locator, Some(Locator::new(1, 12)));
    }
}
