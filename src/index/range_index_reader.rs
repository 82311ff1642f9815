use std::sync::Arc;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, LocalDocId};
use crate::index::index_kind::IndexKind;
use crate::index::index_reader::{IndexReader, SegmentSource, Term};
use crate::index::reader_cache::ReaderCache;
use crate::schema::schema::IndexConfig;
use crate::storage::segment::SegmentData;

/// (key, local doc) pairs of one segment, sorted by key.
#[derive(Debug, Default)]
pub struct SegmentRangeIndex {
    pub entries: Vec<(i64, LocalDocId)>,
}

impl SegmentRangeIndex {
    pub fn build(field: &str, data: &SegmentData) -> Self {
        let mut entries: Vec<(i64, LocalDocId)> = data
            .documents
            .iter()
            .enumerate()
            .filter_map(|(local, doc)| {
                doc.fields
                    .get(field)
                    .and_then(|v| v.as_i64())
                    .map(|key| (key, local as LocalDocId))
            })
            .collect();
        entries.sort_unstable();
        SegmentRangeIndex { entries }
    }

    fn range(&self, from: i64, to: i64) -> &[(i64, LocalDocId)] {
        let start = self.entries.partition_point(|(k, _)| *k < from);
        let end = self.entries.partition_point(|(k, _)| *k <= to);
        &self.entries[start..end.max(start)]
    }
}

/// Numeric range reader for range and date indexes. Date keys are epoch
/// milliseconds.
#[derive(Clone)]
pub struct RangeIndexReader {
    pub name: String,
    pub kind: IndexKind,
    segments: Vec<(u64, Arc<SegmentRangeIndex>)>,
}

impl RangeIndexReader {
    pub fn open(config: &IndexConfig, segments: &[SegmentSource], cache: &ReaderCache) -> Result<Self> {
        let namespace = format!("range:{}", config.name);
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            let part = cache.get_or_build(&namespace, segment.id, segment.doc_count(), || {
                Ok(SegmentRangeIndex::build(&config.field, &segment.data))
            })?;
            parts.push((segment.base_doc_id, part));
        }
        Ok(RangeIndexReader {
            name: config.name.clone(),
            kind: config.kind,
            segments: parts,
        })
    }
}

impl IndexReader for RangeIndexReader {
    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn lookup(&self, term: &Term) -> Result<Vec<DocId>> {
        let (from, to) = match term {
            Term::Range { from, to } => (*from, *to),
            Term::Word(word) => {
                let key = word.trim().parse::<i64>().map_err(|_| {
                    Error::invalid_argument(format!("{} is not a key of range index {}", word, self.name))
                })?;
                (key, key)
            }
            Term::Prefix(_) => {
                return Err(Error::invalid_argument(format!("prefix term on range index {}", self.name)));
            }
        };

        let mut docs = Vec::new();
        for (base, index) in &self.segments {
            let mut locals: Vec<LocalDocId> = index.range(from, to).iter().map(|(_, l)| *l).collect();
            locals.sort_unstable();
            docs.extend(locals.into_iter().map(|l| DocId(base + l as u64)));
        }
        Ok(docs)
    }

    fn clone_reader(&self) -> Box<dyn IndexReader> {
        Box::new(self.clone())
    }

    fn estimate_load_size(&self) -> usize {
        self.segments.iter().map(|(_, s)| s.entries.len() * 12).sum()
    }
}
