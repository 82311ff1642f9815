use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, FieldValue};
use crate::index::accessory_reader::AccessoryReader;
use crate::index::attribute_reader::{AttributeReader, AttributeReaderSet, PackAttributeReader};
use crate::index::deletion_map::DeletionMapReader;
use crate::index::index_reader::{locate, MultiFieldIndexReader, SegmentSource, Term};
use crate::index::join_reader::JoinDocIdReader;
use crate::index::primary_key_reader::PrimaryKeyReader;
use crate::index::reader_cache::ReaderCache;
use crate::index::sorted_range::SortedDocIdRangeSearcher;
use crate::index::source_reader::SourceReader;
use crate::index::summary_reader::SummaryReader;
use crate::partition::data_view::PartitionDataView;
use crate::storage::segment::SegmentId;
use crate::storage::version::Version;

/// Immutable, self-consistent query snapshot of one partition.
///
/// Readers are declared before the view and the segment list so they are
/// dropped first.
pub struct PartitionReader {
    pub index_reader: MultiFieldIndexReader,
    pub primary_key_reader: Arc<PrimaryKeyReader>,
    pub attributes: AttributeReaderSet,
    pub accessory: Arc<AccessoryReader>,
    pub summary_reader: Option<SummaryReader>,
    pub source_reader: Option<SourceReader>,
    pub sorted_range_searcher: Option<SortedDocIdRangeSearcher>,
    pub sub_reader: Option<Arc<PartitionReader>>,
    pub main_to_sub: Option<JoinDocIdReader>,
    pub sub_to_main: Option<JoinDocIdReader>,
    pub deletion_map: Arc<DeletionMapReader>,
    pub cache: Arc<ReaderCache>,              // Per-segment parts, inherited by the next snapshot
    pub segments: Vec<SegmentSource>,
    pub version: Version,
    pub view: Option<Arc<PartitionDataView>>, // None for a sub partition
}

impl PartitionReader {
    pub fn version_id(&self) -> i64 {
        self.version.version_id
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segments.iter().map(|s| s.id).collect()
    }

    pub fn base_doc_ids(&self) -> Vec<(SegmentId, u64)> {
        self.segments.iter().map(|s| (s.id, s.base_doc_id)).collect()
    }

    /// Total doc ids, deleted ones included.
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count()).sum()
    }

    pub fn deleted_doc_count(&self) -> u64 {
        self.deletion_map.deleted_doc_count()
    }

    pub fn visible_doc_count(&self) -> u64 {
        self.doc_count() - self.deleted_doc_count()
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deletion_map.is_deleted(doc)
    }

    /// Visible docs matching `term` in index `index_name`.
    pub fn search(&self, index_name: &str, term: &Term) -> Result<Vec<DocId>> {
        let reader = self
            .index_reader
            .get(index_name)
            .ok_or_else(|| Error::not_found(format!("index {}", index_name)))?;
        let mut docs = reader.lookup(term)?;
        docs.retain(|doc| !self.deletion_map.is_deleted(*doc));
        Ok(docs)
    }

    pub fn lookup_primary_key(&self, primary_key: &str) -> Option<DocId> {
        self.primary_key_reader.lookup_key(primary_key)
    }

    /// Stored fields of a visible doc.
    pub fn get_document(&self, doc: DocId) -> Option<HashMap<String, FieldValue>> {
        if self.is_deleted(doc) {
            return None;
        }
        match &self.summary_reader {
            Some(summary) => summary.get_document(doc),
            None => {
                let (segment, local) = locate(&self.segments, doc)?;
                segment.data.document(local).map(|d| d.fields.clone())
            }
        }
    }

    pub fn get_document_by_key(&self, primary_key: &str) -> Option<HashMap<String, FieldValue>> {
        self.get_document(self.lookup_primary_key(primary_key)?)
    }

    /// Timestamp the visible doc was written with.
    pub fn get_timestamp(&self, doc: DocId) -> Option<i64> {
        if self.is_deleted(doc) {
            return None;
        }
        let (segment, local) = locate(&self.segments, doc)?;
        segment.data.document(local).map(|d| d.timestamp)
    }

    pub fn get_attribute_reader(&self, field: &str) -> Option<Arc<AttributeReader>> {
        self.attributes.get(field)
    }

    pub fn get_pack_attribute_reader(&self, name: &str) -> Option<Arc<PackAttributeReader>> {
        self.attributes.pack(name)
    }

    pub fn get_source_group(&self, doc: DocId, group: &str) -> Option<HashMap<String, FieldValue>> {
        if self.is_deleted(doc) {
            return None;
        }
        self.source_reader.as_ref()?.get_group(doc, group)
    }

    /// Visible sub docs of main doc `doc`.
    pub fn get_sub_docs(&self, doc: DocId) -> Vec<DocId> {
        let (Some(join), Some(sub)) = (&self.main_to_sub, &self.sub_reader) else {
            return Vec::new();
        };
        if self.is_deleted(doc) {
            return Vec::new();
        }
        let range = join.sub_docs(doc);
        (range.start.0..range.end.0)
            .map(DocId)
            .filter(|d| !sub.is_deleted(*d))
            .collect()
    }

    pub fn get_main_doc(&self, sub_doc: DocId) -> Option<DocId> {
        self.sub_to_main.as_ref()?.main_doc(sub_doc)
    }

    /// Doc id ranges that may hold `[from, to]` on the leading sort field.
    /// Without a sort the whole partition is one range.
    pub fn get_doc_id_ranges(&self, from: &FieldValue, to: &FieldValue) -> Vec<Range<DocId>> {
        match &self.sorted_range_searcher {
            Some(searcher) => searcher.get_doc_id_ranges(from, to),
            None if self.doc_count() > 0 => vec![DocId(0)..DocId(self.doc_count())],
            None => Vec::new(),
        }
    }

    pub fn estimate_load_size(&self) -> usize {
        self.index_reader.estimate_load_size()
            + self.sub_reader.as_ref().map(|s| s.estimate_load_size()).unwrap_or(0)
    }
}
