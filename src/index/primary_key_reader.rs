use std::collections::HashMap;
use std::sync::Arc;
use crate::core::error::Result;
use crate::core::types::{DocId, LocalDocId};
use crate::index::deletion_map::DeletionMapReader;
use crate::index::index_kind::IndexKind;
use crate::index::index_reader::{IndexReader, SegmentSource, Term};
use crate::index::reader_cache::ReaderCache;
use crate::storage::segment::{SegmentData, SegmentId};

/// Primary key to the last local doc carrying it in one segment.
#[derive(Debug, Default)]
pub struct SegmentPrimaryKeyIndex {
    pub keys: HashMap<String, LocalDocId>,
}

impl SegmentPrimaryKeyIndex {
    pub fn build(data: &SegmentData) -> Self {
        let mut keys = HashMap::with_capacity(data.documents.len());
        for (local, doc) in data.documents.iter().enumerate() {
            keys.insert(doc.primary_key.clone(), local as LocalDocId);
        }
        SegmentPrimaryKeyIndex { keys }
    }
}

/// Primary key lookup over one snapshot, newest segment first, skipping
/// deleted documents.
#[derive(Clone)]
pub struct PrimaryKeyReader {
    pub name: String,
    segments: Vec<(SegmentId, u64, Arc<SegmentPrimaryKeyIndex>)>,
    deletion_map: Arc<DeletionMapReader>,
}

impl PrimaryKeyReader {
    pub fn open(
        name: &str,
        segments: &[SegmentSource],
        deletion_map: Arc<DeletionMapReader>,
        cache: &ReaderCache,
    ) -> Result<Self> {
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            let part = cache.get_or_build("primary_key", segment.id, segment.doc_count(), || {
                Ok(SegmentPrimaryKeyIndex::build(&segment.data))
            })?;
            parts.push((segment.id, segment.base_doc_id, part));
        }
        Ok(PrimaryKeyReader {
            name: name.to_string(),
            segments: parts,
            deletion_map,
        })
    }

    /// Visible doc for `primary_key`; `None` when absent or deleted.
    pub fn lookup_key(&self, primary_key: &str) -> Option<DocId> {
        self.segments.iter().rev().find_map(|(id, base, index)| {
            let local = *index.keys.get(primary_key)?;
            if self.deletion_map.is_deleted_local(*id, local) {
                None
            } else {
                Some(DocId(base + local as u64))
            }
        })
    }

    /// Every doc ever stored under `primary_key`, visible or not.
    pub fn lookup_all(&self, primary_key: &str) -> Vec<DocId> {
        self.segments
            .iter()
            .filter_map(|(_, base, index)| index.keys.get(primary_key).map(|l| DocId(base + *l as u64)))
            .collect()
    }

    pub fn key_count(&self) -> usize {
        self.segments.iter().map(|(_, _, s)| s.keys.len()).sum()
    }
}

impl IndexReader for PrimaryKeyReader {
    fn kind(&self) -> IndexKind {
        IndexKind::PrimaryKey
    }

    fn lookup(&self, term: &Term) -> Result<Vec<DocId>> {
        Ok(match term {
            Term::Word(pk) => self.lookup_key(pk).into_iter().collect(),
            _ => Vec::new(),
        })
    }

    fn clone_reader(&self) -> Box<dyn IndexReader> {
        Box::new(self.clone())
    }

    fn estimate_load_size(&self) -> usize {
        self.segments
            .iter()
            .map(|(_, _, s)| s.keys.keys().map(|k| k.len() + 12).sum::<usize>())
            .sum()
    }
}
