use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::{Arc, Weak};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use crate::core::error::Result;
use crate::reader::partition_reader::PartitionReader;
use crate::storage::layout::StorageLayout;
use crate::storage::segment::SegmentId;
use crate::storage::version::{list_version_ids, Version, INVALID_VERSION_ID};

/// What one garbage collection pass removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcReport {
    pub removed_versions: Vec<i64>,
    pub removed_segments: Vec<SegmentId>,
    pub removed_realtime_segments: Vec<SegmentId>,
    pub removed_realtime_markers: Vec<i64>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.removed_versions.is_empty()
            && self.removed_segments.is_empty()
            && self.removed_realtime_segments.is_empty()
            && self.removed_realtime_markers.is_empty()
    }
}

/// The latest snapshot plus weak handles to every snapshot published since,
/// grouped by version.
///
/// `latest` is the only strong reference the container holds. Queries read it
/// without locking; the version map is only touched on publish and garbage
/// collection.
pub struct ReaderContainer {
    latest: ArcSwapOption<PartitionReader>,
    readers: Mutex<BTreeMap<i64, Vec<Weak<PartitionReader>>>>,
}

impl Default for ReaderContainer {
    fn default() -> Self {
        ReaderContainer::new()
    }
}

impl ReaderContainer {
    pub fn new() -> Self {
        ReaderContainer {
            latest: ArcSwapOption::empty(),
            readers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn publish(&self, reader: Arc<PartitionReader>) {
        let mut readers = self.readers.lock();
        readers
            .entry(reader.version_id())
            .or_default()
            .push(Arc::downgrade(&reader));
        self.latest.store(Some(reader));
        prune_released(&mut readers);
    }

    pub fn latest(&self) -> Option<Arc<PartitionReader>> {
        self.latest.load_full()
    }

    pub fn latest_version_id(&self) -> i64 {
        self.latest
            .load_full()
            .map(|r| r.version_id())
            .unwrap_or(INVALID_VERSION_ID)
    }

    fn prune(&self) -> usize {
        prune_released(&mut self.readers.lock())
    }

    /// Snapshots still held by the container or a caller.
    pub fn live_readers(&self) -> Vec<Arc<PartitionReader>> {
        self.readers
            .lock()
            .values()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Oldest version any live snapshot still serves.
    pub fn oldest_referenced_version_id(&self) -> i64 {
        self.prune();
        self.readers
            .lock()
            .keys()
            .next()
            .copied()
            .unwrap_or(INVALID_VERSION_ID)
    }

    pub fn live_reader_count(&self) -> usize {
        self.prune();
        self.readers.lock().values().map(|l| l.len()).sum()
    }

    fn live_state(&self) -> (HashSet<i64>, HashSet<SegmentId>) {
        self.prune();
        let live = self.live_readers();
        let versions = live.iter().map(|r| r.version_id()).collect();
        let segments = live.iter().flat_map(|r| r.segment_ids()).collect();
        (versions, segments)
    }

    /// Removes version markers and segment directories no longer needed.
    ///
    /// Kept: the newest `keep_version_count` versions, every version a live
    /// snapshot serves, the latest, anything newer than the latest, and every
    /// segment those or `writer_segments` reference. Only the newest
    /// realtime marker survives.
    pub fn garbage_collect(
        &self,
        layout: &StorageLayout,
        keep_version_count: usize,
        writer_segments: &HashSet<SegmentId>,
    ) -> Result<GcReport> {
        let (live_versions, live_segments) = self.live_state();
        let latest = self.latest_version_id();
        let mut report = GcReport::default();

        let version_ids = list_version_ids(&layout.root)?;
        let keep_from = version_ids.len().saturating_sub(keep_version_count);
        let mut referenced: HashSet<SegmentId> = live_segments.union(writer_segments).copied().collect();
        let mut max_known_segment: Option<SegmentId> = None;
        let mut removable = Vec::new();

        for (i, id) in version_ids.iter().copied().enumerate() {
            let keep = i >= keep_from || live_versions.contains(&id) || id >= latest;
            let version = match Version::load_id(&layout.root, id) {
                Ok(version) => version,
                Err(e) => {
                    if keep {
                        // Cannot tell what a kept version needs; leave segments alone.
                        warn!(version_id = id, error = %e, "unreadable kept version, skipping segment cleanup");
                        max_known_segment = None;
                        referenced.clear();
                        removable.clear();
                        break;
                    }
                    continue;
                }
            };
            if let Some(last) = version.segment_ids.last().copied() {
                max_known_segment = max_known_segment.max(Some(last));
            }
            if keep {
                referenced.extend(version.segment_ids.iter().copied());
            } else {
                removable.push(id);
            }
        }

        for id in removable {
            fs::remove_file(layout.version_path(id))?;
            report.removed_versions.push(id);
        }

        if let Some(max_known) = max_known_segment {
            for id in StorageLayout::list_segment_dirs(&layout.root)? {
                // Segments newer than every version may belong to a build in progress.
                if id.is_realtime() || id > max_known || referenced.contains(&id) {
                    continue;
                }
                fs::remove_dir_all(layout.segment_path(id))?;
                report.removed_segments.push(id);
            }
        }

        for id in StorageLayout::list_segment_dirs(&layout.realtime_root)? {
            if live_segments.contains(&id) || writer_segments.contains(&id) {
                continue;
            }
            fs::remove_dir_all(layout.realtime_segment_path(id))?;
            report.removed_realtime_segments.push(id);
        }

        let markers = list_version_ids(&layout.realtime_root)?;
        for id in markers.iter().rev().skip(1).copied() {
            fs::remove_file(layout.realtime_version_path(id))?;
            report.removed_realtime_markers.push(id);
        }

        if report.is_empty() {
            debug!(latest, "garbage collection found nothing to remove");
        } else {
            info!(
                versions = report.removed_versions.len(),
                segments = report.removed_segments.len(),
                realtime_segments = report.removed_realtime_segments.len(),
                "garbage collected partition files"
            );
        }
        Ok(report)
    }
}

/// Forgets snapshots every caller has released. Returns how many went.
fn prune_released(readers: &mut BTreeMap<i64, Vec<Weak<PartitionReader>>>) -> usize {
    let mut pruned = 0;
    for list in readers.values_mut() {
        let before = list.len();
        list.retain(|r| r.strong_count() > 0);
        pruned += before - list.len();
    }
    readers.retain(|_, list| !list.is_empty());
    pruned
}
