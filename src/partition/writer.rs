use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::core::error::{Error, Result};
use crate::core::types::{DocOperation, Document, Locator};
use crate::index::deletion_map::DeletionMap;
use crate::partition::building_segment::BuildingSegment;
use crate::partition::data_view::{PartitionDataView, RealtimeMarker, ViewSegment};
use crate::partition::pk_resolver::{DocLocation, PrimaryKeyResolver, TimestampTiePolicy};
use crate::partition::reconcile::{compute_seek, reconcile, ReconcileInput, Reconciled, SeekLocator};
use crate::schema::schema::Schema;
use crate::storage::layout::StorageLayout;
use crate::storage::operation_log::{Operation, OperationEntry, OperationLog};
use crate::storage::segment::{SegmentId, StoredDocument};
use crate::storage::segment_reader::read_segment_dir;
use crate::storage::version::{load_latest, Version};

/// What `OnlinePartition::build` did with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Applied,
    Ignored,       // Update of a key with no current document
    QuotaExceeded, // Realtime memory quota reached; nothing was written
}

/// Single-writer realtime state: the adopted version's segments, the sealed
/// realtime chain, the building segment and the deletion map over them.
pub struct PartitionWriter {
    pub schema: Arc<Schema>,
    layout: StorageLayout,
    version_format: Option<u32>,
    max_building_doc_count: usize,
    version: Version,
    on_disk: Vec<ViewSegment>,
    realtime: Vec<ViewSegment>,
    building: BuildingSegment,
    deletion_map: DeletionMap,
    resolver: PrimaryKeyResolver,
    next_sequence: u64,
    next_realtime_sequence: i64,
    realtime_locator: Option<Locator>,
    persisted_marker: Option<Vec<SegmentId>>,
}

impl PartitionWriter {
    /// Rebuilds writer state over `version`, reloading the linked realtime
    /// chain named by the newest realtime marker.
    pub fn recover(
        schema: Arc<Schema>,
        layout: StorageLayout,
        version_format: Option<u32>,
        max_building_doc_count: usize,
        version: Version,
        on_disk: Vec<ViewSegment>,
    ) -> Result<Self> {
        let marker = load_latest(&layout.realtime_root)?;
        let (base_ids, chain_ids) = marker.as_ref().map(RealtimeMarker::split).unwrap_or_default();

        let mut realtime = Vec::with_capacity(chain_ids.len());
        let mut next_sequence = 0u64;
        for id in chain_ids {
            let path = layout.realtime_segment_path(id);
            let loaded = read_segment_dir(&path).and_then(|data| Ok((data, OperationLog::read_entries(&path)?)));
            match loaded {
                Ok((data, operations)) => {
                    if let Some(max) = operations.iter().map(|e| e.sequence).max() {
                        next_sequence = next_sequence.max(max + 1);
                    }
                    realtime.push(ViewSegment::linked(Arc::new(data), path, operations));
                }
                Err(e) => warn!(segment = %id, error = %e, "dropping unreadable realtime segment"),
            }
        }

        let on_dir = StorageLayout::list_segment_dirs(&layout.realtime_root)?
            .into_iter()
            .chain(realtime.iter().map(|s| s.id()))
            .filter(|id| id.is_realtime())
            .map(|id| id.sequence() + 1)
            .max()
            .unwrap_or(0);

        let has_sub = schema.sub_schema.is_some();
        let schema_version_id = schema.schema_version_id;
        let building = BuildingSegment::new(SegmentId::checked_realtime(on_dir)?, schema_version_id, has_sub);
        let policy = TimestampTiePolicy::resolve(&version, version_format);

        let mut writer = PartitionWriter {
            schema,
            layout,
            version_format,
            max_building_doc_count,
            version: Version::empty(),
            on_disk: Vec::new(),
            realtime,
            building,
            deletion_map: DeletionMap::new(),
            resolver: PrimaryKeyResolver::new(policy),
            next_sequence,
            next_realtime_sequence: on_dir + 1,
            realtime_locator: marker.as_ref().and_then(|m| m.locator),
            persisted_marker: marker.as_ref().map(|m| m.segment_ids.clone()),
        };

        let base: HashSet<SegmentId> = base_ids.into_iter().collect();
        let delta: HashSet<SegmentId> = version.segment_ids.iter().copied().filter(|id| !base.contains(id)).collect();
        let reconciled = writer.reconcile_with(version, on_disk, &delta);
        writer.commit(reconciled);

        info!(
            version_id = writer.version.version_id,
            realtime_segments = writer.realtime.len(),
            next_sequence = writer.next_sequence,
            "recovered partition writer"
        );
        Ok(writer)
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn policy(&self) -> TimestampTiePolicy {
        self.resolver.policy
    }

    pub fn deletion_map(&self) -> &DeletionMap {
        &self.deletion_map
    }

    pub fn realtime_segments(&self) -> &[ViewSegment] {
        &self.realtime
    }

    pub fn building_doc_count(&self) -> u64 {
        self.building.doc_count()
    }

    pub fn realtime_locator(&self) -> Option<Locator> {
        self.realtime_locator
    }

    pub fn seek(&self) -> SeekLocator {
        compute_seek(&self.version, self.realtime_locator, self.resolver.policy)
    }

    pub fn loaded_segment(&self, id: SegmentId) -> Option<&ViewSegment> {
        self.on_disk.iter().find(|s| s.id() == id)
    }

    /// Segments the writer still needs on disk or in memory.
    pub fn referenced_segments(&self) -> HashSet<SegmentId> {
        self.on_disk
            .iter()
            .chain(self.realtime.iter())
            .map(|s| s.id())
            .chain(std::iter::once(self.building.id))
            .collect()
    }

    /// Bytes of realtime data not yet linked to disk.
    pub fn realtime_memory_use(&self) -> usize {
        self.realtime
            .iter()
            .filter(|s| s.is_in_memory())
            .map(|s| s.data.memory_use())
            .sum::<usize>()
            + self.building.memory_use()
    }

    pub fn apply(&mut self, doc: &Document) -> Result<BuildStatus> {
        if doc.primary_key.is_empty() {
            return Err(Error::invalid_argument("document without primary key"));
        }
        let locator = doc.locator();
        match doc.operation {
            DocOperation::Add => self.add(doc, locator),
            DocOperation::Delete => {
                self.record(locator, Operation::Delete {
                    primary_key: doc.primary_key.clone(),
                    timestamp: doc.timestamp,
                });
                let killed = self.resolver.apply_realtime_delete(&doc.primary_key, doc.timestamp);
                self.kill(killed);
                Ok(BuildStatus::Applied)
            }
            DocOperation::UpdateField => {
                let Some(stored) = self.resolver.current(&doc.primary_key).and_then(|l| self.stored_document(l)) else {
                    debug!(primary_key = %doc.primary_key, "update of unknown key ignored");
                    return Ok(BuildStatus::Ignored);
                };
                let mut merged = Document::add(&doc.primary_key, doc.timestamp).with_source(doc.source);
                merged.fields = stored.fields;
                merged.fields.extend(doc.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged.sub_documents = doc.sub_documents.clone();
                self.add(&merged, locator)
            }
        }
    }

    fn add(&mut self, doc: &Document, locator: Locator) -> Result<BuildStatus> {
        let local = self.building.add_document(doc);
        let id = self.building.id;
        self.deletion_map.extend_segment(id, self.building.doc_count() as u32);
        self.record(locator, Operation::Add {
            primary_key: doc.primary_key.clone(),
            timestamp: doc.timestamp,
            segment_id: id,
            local_doc_id: local,
        });
        let killed = self
            .resolver
            .apply_realtime_add(&doc.primary_key, DocLocation::realtime(id, local, doc.timestamp));
        self.kill(killed);
        Ok(BuildStatus::Applied)
    }

    fn record(&mut self, locator: Locator, operation: Operation) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.building.record(OperationEntry { sequence, locator, operation });
        self.realtime_locator = match self.realtime_locator {
            Some(current) if current.is_same_source(&locator) && current.offset > locator.offset => Some(current),
            _ => Some(locator),
        };
    }

    fn kill(&self, killed: Option<DocLocation>) {
        if let Some(doc) = killed {
            self.deletion_map.mark_deleted(doc.segment_id, doc.local_doc_id);
        }
    }

    fn stored_document(&self, location: DocLocation) -> Option<StoredDocument> {
        if location.segment_id == self.building.id {
            return self.building.document(location.local_doc_id).cloned();
        }
        self.on_disk
            .iter()
            .chain(self.realtime.iter())
            .find(|s| s.id() == location.segment_id)
            .and_then(|s| s.data.document(location.local_doc_id).cloned())
    }

    pub fn should_seal(&self) -> bool {
        self.building.doc_count() as usize >= self.max_building_doc_count
    }

    /// Moves the building segment to the end of the realtime chain and opens
    /// a fresh one. `None` when there is nothing to seal; an error once the
    /// realtime sequence space is used up.
    pub fn seal_building(&mut self) -> Result<Option<ViewSegment>> {
        if self.building.doc_count() == 0 {
            return Ok(None);
        }
        let next = BuildingSegment::new(
            SegmentId::checked_realtime(self.next_realtime_sequence)?,
            self.building.schema_version_id,
            self.building.has_sub_documents,
        );
        self.next_realtime_sequence += 1;
        self.deletion_map.add_segment(next.id, 0);

        let sealed = std::mem::replace(&mut self.building, next).seal();
        debug!(segment = %sealed.id(), docs = sealed.doc_count(), "sealed building segment");
        self.realtime.push(sealed.clone());
        Ok(Some(sealed))
    }

    /// Current state as a view for the snapshot builder.
    pub fn view(&mut self) -> Result<PartitionDataView> {
        PartitionDataView::build(
            self.version.clone(),
            self.on_disk.clone(),
            self.realtime.clone(),
            Some(self.building.view_segment()),
        )
    }

    /// Folds `version` in without touching the live state.
    pub fn prepare(&mut self, version: Version, on_disk: Vec<ViewSegment>) -> Reconciled {
        let delta: HashSet<SegmentId> = version
            .segment_ids
            .iter()
            .copied()
            .filter(|id| !self.version.contains(*id))
            .collect();
        self.reconcile_with(version, on_disk, &delta)
    }

    fn reconcile_with(&mut self, version: Version, on_disk: Vec<ViewSegment>, delta: &HashSet<SegmentId>) -> Reconciled {
        let policy = TimestampTiePolicy::resolve(&version, self.version_format);
        let building = self.building.view_segment();
        reconcile(ReconcileInput {
            version: &version,
            on_disk,
            delta,
            realtime: &self.realtime,
            building: &building,
            previous: &self.deletion_map,
            policy,
            realtime_locator: self.realtime_locator,
        })
    }

    /// View of a prepared state, for building its snapshot before commit.
    pub fn prepared_view(&mut self, prepared: &Reconciled) -> Result<PartitionDataView> {
        PartitionDataView::build(
            prepared.version.clone(),
            prepared.on_disk.clone(),
            prepared.realtime.clone(),
            Some(self.building.view_segment()),
        )
    }

    pub fn commit(&mut self, prepared: Reconciled) {
        if !prepared.dropped.is_empty() {
            info!(dropped = ?prepared.dropped, "dropped obsolete realtime segments");
        }
        self.version = prepared.version;
        self.on_disk = prepared.on_disk;
        self.realtime = prepared.realtime;
        self.building.replace_operations(prepared.building_operations);
        self.deletion_map = prepared.deletion_map;
        self.resolver = prepared.resolver;
    }

    /// Rewrites the realtime marker when the linked chain or its base
    /// version changed. Returns whether a marker was written.
    ///
    /// Only the linked prefix of the chain is recorded, so the resume
    /// locator never passes a segment that is still in memory.
    pub fn persist_realtime_marker(&mut self) -> Result<bool> {
        let linked: Vec<&ViewSegment> = self.realtime.iter().take_while(|s| s.is_linked()).collect();
        let mut content = self.version.segment_ids.clone();
        content.extend(linked.iter().map(|s| s.id()));

        let unchanged = match &self.persisted_marker {
            Some(previous) => *previous == content,
            None => linked.is_empty(),
        };
        if unchanged {
            return Ok(false);
        }

        let locator = linked
            .iter()
            .flat_map(|s| s.operations.iter())
            .max_by_key(|e| e.sequence)
            .map(|e| e.locator);
        let ids: Vec<SegmentId> = linked.iter().map(|s| s.id()).collect();
        RealtimeMarker::store(&self.layout, &self.version, &ids, locator)?;
        self.persisted_marker = Some(content);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FieldValue;
    use crate::index::index_kind::IndexKind;
    use crate::schema::schema::FieldType;

    fn writer(dir: &std::path::Path, max_docs: usize) -> PartitionWriter {
        let schema = Arc::new(
            Schema::new()
                .add_field("id", FieldType::Text)
                .add_field("price", FieldType::Integer)
                .add_index("pk", IndexKind::PrimaryKey, "id"),
        );
        let layout = StorageLayout::new(dir.to_path_buf()).unwrap();
        PartitionWriter::recover(schema, layout, None, max_docs, Version::empty(), Vec::new()).unwrap()
    }

    #[test]
    fn later_add_kills_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), 10);
        writer.apply(&Document::add("a", 1)).unwrap();
        writer.apply(&Document::add("a", 2)).unwrap();

        let building = writer.building.id;
        assert!(writer.deletion_map.is_deleted(building, 0));
        assert!(!writer.deletion_map.is_deleted(building, 1));
        assert_eq!(writer.realtime_locator(), Some(Locator::new(0, 2)));
    }

    #[test]
    fn update_merges_into_current_doc() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), 10);
        writer
            .apply(&Document::add("a", 1).with_text("id", "a").with_field("price", FieldValue::Integer(3)))
            .unwrap();
        let status = writer
            .apply(&Document::update("a", 2).with_field("price", FieldValue::Integer(4)))
            .unwrap();
        assert_eq!(status, BuildStatus::Applied);

        let merged = writer.building.document(1).unwrap();
        assert_eq!(merged.fields.get("id"), Some(&FieldValue::Text("a".into())));
        assert_eq!(merged.fields.get("price"), Some(&FieldValue::Integer(4)));
        assert_eq!(writer.apply(&Document::update("zzz", 3)).unwrap(), BuildStatus::Ignored);
    }

    #[test]
    fn sealing_starts_a_new_building_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), 1);
        writer.apply(&Document::add("a", 1)).unwrap();
        assert!(writer.should_seal());

        let first = writer.building.id;
        let sealed = writer.seal_building().unwrap().unwrap();
        assert_eq!(sealed.id(), first);
        assert!(writer.building.id > first);
        assert!(writer.seal_building().unwrap().is_none());
        assert_eq!(writer.view().unwrap().segment_ids(), vec![first, writer.building.id]);
    }

    #[test]
    fn exhausted_realtime_sequence_refuses_to_seal() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), 1);
        writer.apply(&Document::add("a", 1)).unwrap();
        writer.next_realtime_sequence = crate::storage::segment::REALTIME_SEGMENT_MASK;

        let building = writer.building.id;
        assert!(writer.seal_building().is_err());
        assert_eq!(writer.building.id, building);
        assert_eq!(writer.building.doc_count(), 1);
        assert!(writer.realtime.is_empty());
    }

    #[test]
    fn marker_stops_at_first_segment_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = writer(dir.path(), 1);
        writer.apply(&Document::add("a", 1)).unwrap();
        let first = writer.seal_building().unwrap().unwrap();
        writer.apply(&Document::add("b", 2)).unwrap();
        let second = writer.seal_building().unwrap().unwrap();

        crate::partition::data_view::link_segment(&writer.layout, &second).unwrap();
        assert!(!writer.persist_realtime_marker().unwrap());
        assert!(load_latest(&writer.layout.realtime_root).unwrap().is_none());

        crate::partition::data_view::link_segment(&writer.layout, &first).unwrap();
        assert!(writer.persist_realtime_marker().unwrap());
        let marker = load_latest(&writer.layout.realtime_root).unwrap().unwrap();
        assert_eq!(RealtimeMarker::split(&marker).1, vec![first.id(), second.id()]);
        assert_eq!(marker.locator, Some(Locator::new(0, 2)));
    }
}
