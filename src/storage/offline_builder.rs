use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use crate::core::error::Result;
use crate::core::types::{Document, Locator, LocalDocId};
use crate::schema::schema::{Schema, SortDescription, SortOrder};
use crate::storage::layout::StorageLayout;
use crate::storage::segment::{DeleteRecord, SegmentData, SegmentId, SegmentInfo, SegmentKind, StoredDocument};
use crate::storage::segment_reader::read_segment_dir;
use crate::storage::segment_writer::write_segment_dir;
use crate::storage::version::{load_latest, Version, DEFAULT_VERSION_FORMAT};

/// Produces full and incremental on-disk versions.
///
/// Stands in for the offline build pipeline: each `commit` writes the pending
/// documents as one new segment and announces a version that appends it;
/// `merge` folds every live document into a single segment.
pub struct OfflineIndexBuilder {
    pub layout: StorageLayout,
    pub schema: Arc<Schema>,
    pub current: Version,
    pub next_segment_id: i64,
    pub format_version: u32,
    pub source: u64,
    pending: Vec<Document>,
    pending_deletes: Vec<DeleteRecord>,
}

impl OfflineIndexBuilder {
    pub fn open<P: AsRef<Path>>(root: P, schema: Arc<Schema>) -> Result<Self> {
        let layout = StorageLayout::new(root.as_ref().to_path_buf())?;
        let current = load_latest(&layout.root)?.unwrap_or_else(Version::empty);

        let on_disk_max = StorageLayout::list_segment_dirs(&layout.root)?
            .into_iter()
            .map(|id| id.0)
            .max();
        let version_max = current.segment_ids.iter().map(|id| id.0).max();
        let next_segment_id = on_disk_max.max(version_max).map(|m| m + 1).unwrap_or(0);

        Ok(OfflineIndexBuilder {
            layout,
            schema,
            current,
            next_segment_id,
            format_version: DEFAULT_VERSION_FORMAT,
            source: 0,
            pending: Vec::new(),
            pending_deletes: Vec::new(),
        })
    }

    pub fn with_format_version(mut self, format_version: u32) -> Self {
        self.format_version = format_version;
        self
    }

    pub fn with_source(mut self, source: u64) -> Self {
        self.source = source;
        self
    }

    pub fn root(&self) -> &PathBuf {
        &self.layout.root
    }

    /// Later adds of the same key in one batch replace earlier ones.
    pub fn add(&mut self, doc: Document) {
        self.pending.retain(|d| d.primary_key != doc.primary_key);
        self.pending.push(doc);
    }

    /// Deletes `primary_key` from older segments and from this batch.
    pub fn delete(&mut self, primary_key: &str, timestamp: i64) {
        self.pending.retain(|d| d.primary_key != primary_key);
        self.pending_deletes.push(DeleteRecord {
            primary_key: primary_key.to_string(),
            timestamp,
        });
    }

    /// Writes the pending batch and announces a version at `timestamp`.
    pub fn commit(&mut self, timestamp: i64) -> Result<Version> {
        let docs = std::mem::take(&mut self.pending);
        let deletes = std::mem::take(&mut self.pending_deletes);

        let mut segment_ids = self.current.segment_ids.clone();
        if !docs.is_empty() || !deletes.is_empty() {
            let id = self.allocate_segment_id()?;
            let entries = docs
                .iter()
                .map(|d| {
                    let subs = d.sub_documents.iter().map(StoredDocument::from_document).collect();
                    (StoredDocument::from_document(d), subs)
                })
                .collect();
            let segment = self.build_segment(id, entries, deletes, timestamp);
            write_segment_dir(&self.layout.segment_path(id), &segment)?;
            segment_ids.push(id);
        }

        self.announce(segment_ids, timestamp)
    }

    /// Folds every live document of the current version into one segment.
    pub fn merge(&mut self, timestamp: i64) -> Result<Version> {
        let mut slots: Vec<Option<(StoredDocument, Vec<StoredDocument>)>> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for id in self.current.segment_ids.clone() {
            let segment = read_segment_dir(&self.layout.segment_path(id))?;
            for record in &segment.deletions {
                if let Some(slot) = by_key.remove(&record.primary_key) {
                    slots[slot] = None;
                }
            }
            for (local, doc) in segment.documents.iter().enumerate() {
                if let Some(slot) = by_key.remove(&doc.primary_key) {
                    slots[slot] = None;
                }
                let subs = match &segment.sub_segment {
                    Some(sub) => segment
                        .sub_doc_range(local as LocalDocId)
                        .filter_map(|s| sub.document(s).cloned())
                        .collect(),
                    None => Vec::new(),
                };
                by_key.insert(doc.primary_key.clone(), slots.len());
                slots.push(Some((doc.clone(), subs)));
            }
        }

        let id = self.allocate_segment_id()?;
        let segment = self.build_segment(id, slots.into_iter().flatten().collect(), Vec::new(), timestamp);
        write_segment_dir(&self.layout.segment_path(id), &segment)?;
        self.announce(vec![id], timestamp)
    }

    fn allocate_segment_id(&mut self) -> Result<SegmentId> {
        let id = SegmentId::checked_built(self.next_segment_id)?;
        self.next_segment_id += 1;
        Ok(id)
    }

    fn build_segment(
        &self,
        id: SegmentId,
        mut entries: Vec<(StoredDocument, Vec<StoredDocument>)>,
        deletes: Vec<DeleteRecord>,
        timestamp: i64,
    ) -> SegmentData {
        if !self.schema.sort_descriptions.is_empty() {
            let sorts = &self.schema.sort_descriptions;
            entries.sort_by(|a, b| compare_by_sort(&a.0, &b.0, sorts));
        }

        let mut info = SegmentInfo::new(id, SegmentKind::Built, self.schema.schema_version_id);
        info.locator = Some(Locator::new(self.source, timestamp));

        let (sub_segment, sub_doc_ends) = if self.schema.sub_schema.is_some() {
            let mut sub_docs = Vec::new();
            let mut ends = Vec::with_capacity(entries.len());
            for (_, subs) in &entries {
                sub_docs.extend(subs.iter().cloned());
                ends.push(sub_docs.len() as LocalDocId);
            }
            let sub_info = SegmentInfo::new(id, SegmentKind::Built, self.schema.schema_version_id);
            (Some(Arc::new(SegmentData::new(sub_info, sub_docs, Vec::new(), None, Vec::new()))), ends)
        } else {
            (None, Vec::new())
        };

        let documents = entries.into_iter().map(|(doc, _)| doc).collect();
        SegmentData::new(info, documents, deletes, sub_segment, sub_doc_ends)
    }

    fn announce(&mut self, segment_ids: Vec<SegmentId>, timestamp: i64) -> Result<Version> {
        let version_id = if self.current.is_valid() { self.current.version_id + 1 } else { 0 };
        let mut version = Version::new(version_id, segment_ids, self.schema.schema_version_id, timestamp);
        version.locator = Some(Locator::new(self.source, timestamp));
        version.format_version = self.format_version;
        version.store(&self.layout.root)?;

        info!(version_id, segments = version.segment_ids.len(), timestamp, "offline version committed");
        self.current = version.clone();
        Ok(version)
    }
}

/// Documents missing a sort field order after those that have it.
pub fn compare_by_sort(a: &StoredDocument, b: &StoredDocument, sorts: &[SortDescription]) -> Ordering {
    for sort in sorts {
        let ord = match (a.fields.get(&sort.field), b.fields.get(&sort.field)) {
            (Some(x), Some(y)) => {
                let ord = x.compare(y).unwrap_or(Ordering::Equal);
                match sort.order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FieldValue;
    use crate::schema::schema::FieldType;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .add_field("pk", FieldType::Text)
                .add_field("price", FieldType::Integer)
                .sort_by("price", SortOrder::Descending),
        )
    }

    #[test]
    fn commits_append_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = OfflineIndexBuilder::open(dir.path(), schema()).unwrap();

        builder.add(Document::add("1", 1));
        let full = builder.commit(1).unwrap();
        builder.add(Document::add("2", 2));
        let inc = builder.commit(2).unwrap();

        assert_eq!(full.version_id, 0);
        assert_eq!(inc.version_id, 1);
        assert_eq!(inc.segment_ids, vec![SegmentId(0), SegmentId(1)]);
        assert!(dir.path().join("version.1").exists());
    }

    #[test]
    fn sort_build_orders_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = OfflineIndexBuilder::open(dir.path(), schema()).unwrap();
        for (pk, price) in [("a", 5), ("b", 9), ("c", 1)] {
            builder.add(Document::add(pk, 1).with_field("price", FieldValue::Integer(price)));
        }
        builder.commit(1).unwrap();

        let segment = read_segment_dir(&builder.layout.segment_path(SegmentId(0))).unwrap();
        let pks: Vec<_> = segment.documents.iter().map(|d| d.primary_key.as_str()).collect();
        assert_eq!(pks, vec!["b", "a", "c"]);
    }

    #[test]
    fn merge_drops_deleted_and_replaced_docs() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = OfflineIndexBuilder::open(dir.path(), schema()).unwrap();
        builder.add(Document::add("a", 1));
        builder.add(Document::add("b", 1));
        builder.commit(1).unwrap();
        builder.delete("a", 2);
        builder.add(Document::add("b", 2));
        builder.commit(2).unwrap();

        let merged = builder.merge(3).unwrap();
        assert_eq!(merged.segment_ids, vec![SegmentId(2)]);
        let segment = read_segment_dir(&builder.layout.segment_path(SegmentId(2))).unwrap();
        assert_eq!(segment.documents.len(), 1);
        assert_eq!(segment.documents.get(0).map(|d| d.timestamp), Some(2));
    }

    #[test]
    fn built_ids_stop_short_of_the_realtime_tag() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = OfflineIndexBuilder::open(dir.path(), schema()).unwrap();
        builder.next_segment_id = crate::storage::segment::REALTIME_SEGMENT_MASK;

        builder.add(Document::add("1", 1));
        assert!(builder.commit(1).is_err());
        assert!(load_latest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn reopening_builder_continues_ids() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut builder = OfflineIndexBuilder::open(dir.path(), schema()).unwrap();
            builder.add(Document::add("a", 1));
            builder.commit(1).unwrap();
        }
        let mut builder = OfflineIndexBuilder::open(dir.path(), schema()).unwrap();
        builder.add(Document::add("b", 2));
        let version = builder.commit(2).unwrap();
        assert_eq!(version.version_id, 1);
        assert_eq!(version.segment_ids, vec![SegmentId(0), SegmentId(1)]);
    }
}
