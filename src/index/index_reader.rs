use std::collections::HashMap;
use std::sync::Arc;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, LocalDocId};
use crate::index::accessory_reader::{AccessoryReader, SectionAttributeReader};
use crate::index::index_kind::IndexKind;
use crate::storage::segment::{SegmentData, SegmentId, SegmentKind};

/// Query term accepted by every index reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Word(String),
    Prefix(String),
    Range { from: i64, to: i64 }, // Inclusive on both ends
}

impl Term {
    pub fn word(text: &str) -> Self {
        Term::Word(text.to_string())
    }

    pub fn prefix(text: &str) -> Self {
        Term::Prefix(text.to_string())
    }

    pub fn range(from: i64, to: i64) -> Self {
        Term::Range { from, to }
    }
}

/// One segment as seen by readers: where its doc ids start and its payload.
#[derive(Debug, Clone)]
pub struct SegmentSource {
    pub id: SegmentId,
    pub kind: SegmentKind,
    pub base_doc_id: u64,
    pub data: Arc<SegmentData>,
}

impl SegmentSource {
    pub fn doc_count(&self) -> u64 {
        self.data.doc_count()
    }

    pub fn global(&self, local: LocalDocId) -> DocId {
        DocId(self.base_doc_id + local as u64)
    }

    pub fn contains(&self, doc: DocId) -> bool {
        doc.0 >= self.base_doc_id && doc.0 < self.base_doc_id + self.doc_count()
    }
}

/// Segment holding `doc` and the doc's local id there.
pub fn locate(segments: &[SegmentSource], doc: DocId) -> Option<(&SegmentSource, LocalDocId)> {
    locate_index(segments, doc).map(|(i, local)| (&segments[i], local))
}

/// Position of the segment holding `doc` and the doc's local id there.
pub fn locate_index(segments: &[SegmentSource], doc: DocId) -> Option<(usize, LocalDocId)> {
    let idx = segments.partition_point(|s| s.base_doc_id <= doc.0);
    // Skip back over empty segments sharing the same base.
    (0..idx)
        .rev()
        .find(|&i| segments[i].contains(doc))
        .map(|i| (i, (doc.0 - segments[i].base_doc_id) as LocalDocId))
}

/// Read capability shared by every index kind, including customized ones.
pub trait IndexReader: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Matching doc ids, ascending. Deleted documents are not filtered here.
    fn lookup(&self, term: &Term) -> Result<Vec<DocId>>;

    fn section_reader(&self) -> Option<Arc<SectionAttributeReader>> {
        None
    }

    /// Called once before the reader is shared.
    fn attach_accessory(&mut self, _accessory: &AccessoryReader) {}

    fn clone_reader(&self) -> Box<dyn IndexReader>;

    fn estimate_load_size(&self) -> usize;
}

/// Index readers of one snapshot addressed by index name.
#[derive(Default, Clone)]
pub struct MultiFieldIndexReader {
    pub readers: HashMap<String, Arc<dyn IndexReader>>,
}

impl MultiFieldIndexReader {
    pub fn new() -> Self {
        MultiFieldIndexReader {
            readers: HashMap::new(),
        }
    }

    pub fn add_reader(&mut self, name: &str, reader: Arc<dyn IndexReader>) -> Result<()> {
        if self.readers.contains_key(name) {
            return Err(Error::inconsistent(format!("index reader {} registered twice", name)));
        }
        self.readers.insert(name.to_string(), reader);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn IndexReader>> {
        self.readers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.readers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.readers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn estimate_load_size(&self) -> usize {
        self.readers.values().map(|r| r.estimate_load_size()).sum()
    }
}
