use std::collections::{HashMap, HashSet};
use std::iter;
use tracing::{debug, warn};
use crate::core::types::{LocalDocId, Locator};
use crate::index::deletion_map::DeletionMap;
use crate::partition::data_view::ViewSegment;
use crate::partition::pk_resolver::{DocLocation, PrimaryKeyResolver, TimestampTiePolicy};
use crate::storage::operation_log::{Operation, OperationEntry};
use crate::storage::segment::SegmentId;
use crate::storage::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorSource {
    FromIncremental,
    FromRealtime,
}

/// Where the realtime stream resumes after a version is adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekLocator {
    pub locator: Option<Locator>,
    pub source: LocatorSource,
}

/// Picks the resume point from the incremental version and the newest
/// realtime locator.
pub fn compute_seek(version: &Version, realtime: Option<Locator>, policy: TimestampTiePolicy) -> SeekLocator {
    let incremental = version.locator.or_else(|| {
        version
            .is_valid()
            .then(|| Locator::new(realtime.map_or(0, |r| r.source), version.timestamp))
    });

    match (incremental, realtime) {
        (None, realtime) => SeekLocator {
            locator: realtime,
            source: LocatorSource::FromRealtime,
        },
        (Some(inc), Some(rt)) if inc.is_same_source(&rt) => {
            if policy.incremental_covers(version.timestamp, rt.offset) {
                SeekLocator {
                    locator: Some(Locator::new(inc.source, version.timestamp)),
                    source: LocatorSource::FromIncremental,
                }
            } else {
                SeekLocator {
                    locator: Some(rt),
                    source: LocatorSource::FromRealtime,
                }
            }
        }
        (Some(inc), _) => SeekLocator {
            locator: Some(inc),
            source: LocatorSource::FromIncremental,
        },
    }
}

pub struct ReconcileInput<'a> {
    pub version: &'a Version,
    pub on_disk: Vec<ViewSegment>,
    pub delta: &'a HashSet<SegmentId>, // On-disk segments new to this adoption
    pub realtime: &'a [ViewSegment],
    pub building: &'a ViewSegment,
    pub previous: &'a DeletionMap,
    pub policy: TimestampTiePolicy,
    pub realtime_locator: Option<Locator>,
}

/// Writer state after a version is folded in; committed only once the
/// snapshot built from it is published.
pub struct Reconciled {
    pub version: Version,
    pub on_disk: Vec<ViewSegment>,
    pub realtime: Vec<ViewSegment>,
    pub building_operations: Vec<OperationEntry>,
    pub deletion_map: DeletionMap,
    pub resolver: PrimaryKeyResolver,
    pub seek: SeekLocator,
    pub trimmed: usize,
    pub dropped: Vec<SegmentId>,
}

fn kill(map: &DeletionMap, killed: Option<DocLocation>) {
    if let Some(doc) = killed {
        map.mark_deleted(doc.segment_id, doc.local_doc_id);
    }
}

/// Folds `input.version` into the realtime state.
///
/// Deletions of every shared segment carry over, the on-disk key state is
/// recomputed oldest segment first, realtime documents the new segments
/// cover are trimmed, and the realtime operation log is replayed on top.
pub fn reconcile(input: ReconcileInput<'_>) -> Reconciled {
    let ReconcileInput {
        version,
        on_disk,
        delta,
        realtime,
        building,
        previous,
        policy,
        realtime_locator,
    } = input;
    let incremental_ts = version.timestamp;

    let deletion_map = DeletionMap::new();
    for segment in on_disk.iter().chain(realtime.iter()).chain(iter::once(building)) {
        deletion_map.inherit_segment(previous, segment.id(), segment.doc_count() as u32);
    }

    let mut resolver = PrimaryKeyResolver::new(policy);
    for segment in &on_disk {
        let id = segment.id();
        for record in &segment.data.deletions {
            kill(&deletion_map, resolver.apply_disk_delete(&record.primary_key));
        }
        for (local, doc) in segment.data.documents.iter().enumerate() {
            let local = local as LocalDocId;
            let deleted = deletion_map.is_deleted(id, local);
            let location = DocLocation::on_disk(id, local, doc.timestamp);
            kill(&deletion_map, resolver.apply_disk_add(&doc.primary_key, location, deleted));
        }
    }

    let trimmed = trim_covered(&deletion_map, &on_disk, delta, realtime, building, policy, incremental_ts);

    let mut surviving = Vec::with_capacity(realtime.len());
    let mut dropped = Vec::new();
    let mut building_operations = Vec::new();
    for segment in realtime {
        let id = segment.id();
        if deletion_map.deleted_count(id) < segment.doc_count() {
            surviving.push(segment.clone());
            continue;
        }
        building_operations.extend(
            segment
                .operations
                .iter()
                .filter(|e| matches!(e.operation, Operation::Delete { timestamp, .. } if timestamp > incremental_ts))
                .cloned(),
        );
        deletion_map.remove_segment(id);
        dropped.push(id);
    }
    building_operations.extend(building.operations.iter().cloned());
    building_operations.sort_by_key(|e| e.sequence);

    let doc_counts: HashMap<SegmentId, u64> = surviving
        .iter()
        .chain(iter::once(building))
        .map(|s| (s.id(), s.doc_count()))
        .collect();
    let mut replay: Vec<&OperationEntry> = surviving
        .iter()
        .flat_map(|s| s.operations.iter())
        .chain(building_operations.iter())
        .collect();
    replay.sort_by_key(|e| e.sequence);

    for entry in replay {
        match &entry.operation {
            Operation::Add { primary_key, timestamp, segment_id, local_doc_id } => {
                let Some(&count) = doc_counts.get(segment_id) else {
                    if !dropped.contains(segment_id) {
                        warn!(segment = %segment_id, sequence = entry.sequence, "operation refers to unknown segment");
                    }
                    continue;
                };
                if *local_doc_id as u64 >= count || deletion_map.is_deleted(*segment_id, *local_doc_id) {
                    continue;
                }
                let location = DocLocation::realtime(*segment_id, *local_doc_id, *timestamp);
                kill(&deletion_map, resolver.apply_realtime_add(primary_key, location));
            }
            Operation::Delete { primary_key, timestamp } => {
                kill(&deletion_map, resolver.apply_realtime_delete(primary_key, *timestamp));
            }
        }
    }

    let seek = compute_seek(version, realtime_locator, policy);
    debug!(
        version_id = version.version_id,
        trimmed,
        dropped = dropped.len(),
        realtime_segments = surviving.len(),
        "reconciled realtime state"
    );

    Reconciled {
        version: version.clone(),
        on_disk,
        realtime: surviving,
        building_operations,
        deletion_map,
        resolver,
        seek,
        trimmed,
        dropped,
    }
}

/// Marks realtime documents obsolete whose key appears in a segment the
/// version newly brought in. Returns how many were newly deleted.
fn trim_covered(
    deletion_map: &DeletionMap,
    on_disk: &[ViewSegment],
    delta: &HashSet<SegmentId>,
    realtime: &[ViewSegment],
    building: &ViewSegment,
    policy: TimestampTiePolicy,
    incremental_ts: i64,
) -> usize {
    let covered: HashSet<&str> = on_disk
        .iter()
        .filter(|s| delta.contains(&s.id()))
        .flat_map(|s| {
            s.data
                .documents
                .iter()
                .map(|d| d.primary_key.as_str())
                .chain(s.data.deletions.iter().map(|r| r.primary_key.as_str()))
        })
        .collect();
    if covered.is_empty() {
        return 0;
    }

    let mut chain_at_tie: HashMap<&str, bool> = HashMap::new();
    for segment in realtime.iter().chain(iter::once(building)) {
        for doc in segment.data.documents.iter() {
            if covered.contains(doc.primary_key.as_str()) {
                let tie = chain_at_tie.entry(doc.primary_key.as_str()).or_insert(true);
                *tie &= doc.timestamp == incremental_ts;
            }
        }
    }

    let mut trimmed = 0;
    for segment in realtime.iter().chain(iter::once(building)) {
        let id = segment.id();
        for (local, doc) in segment.data.documents.iter().enumerate() {
            let Some(&at_tie) = chain_at_tie.get(doc.primary_key.as_str()) else {
                continue;
            };
            if policy.trims(doc.timestamp, incremental_ts, at_tie) && deletion_map.mark_deleted(id, local as LocalDocId) {
                trimmed += 1;
            }
        }
    }
    trimmed
}
