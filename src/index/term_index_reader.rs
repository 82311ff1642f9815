use std::collections::BTreeMap;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, LocalDocId};
use crate::index::accessory_reader::{AccessoryReader, SectionAttributeReader};
use crate::index::index_kind::IndexKind;
use crate::index::index_reader::{IndexReader, SegmentSource, Term};
use crate::index::reader_cache::ReaderCache;
use crate::schema::schema::IndexConfig;
use crate::storage::segment::SegmentData;

/// Term dictionary of one segment.
#[derive(Debug, Default)]
pub struct SegmentTermIndex {
    pub postings: BTreeMap<String, Vec<LocalDocId>>,
    pub posting_count: usize,
}

impl SegmentTermIndex {
    pub fn build(kind: IndexKind, field: &str, data: &SegmentData) -> Self {
        let mut index = SegmentTermIndex::default();
        for (local, doc) in data.documents.iter().enumerate() {
            let Some(value) = doc.fields.get(field) else {
                continue;
            };
            let text = value.to_index_text();
            let mut terms = index_terms(kind, &text);
            terms.sort();
            terms.dedup();
            for term in terms {
                index.postings.entry(term).or_default().push(local as LocalDocId);
                index.posting_count += 1;
            }
        }
        index
    }

    pub fn estimate_size(&self) -> usize {
        self.postings.keys().map(|k| k.len() + 24).sum::<usize>() + self.posting_count * 4
    }
}

/// Terms a field value is indexed under.
///
/// Normal indexes tokenize into lowercased words; trie and spatial indexes
/// keep the whole value as one key.
pub fn index_terms(kind: IndexKind, text: &str) -> Vec<String> {
    match kind {
        IndexKind::Normal | IndexKind::Customized => {
            text.unicode_words().map(|w| w.to_lowercase()).collect()
        }
        IndexKind::Trie => vec![text.to_lowercase()],
        _ => vec![text.to_string()],
    }
}

/// Inverted index reader for normal, trie and spatial indexes.
#[derive(Clone)]
pub struct TermIndexReader {
    pub name: String,
    pub kind: IndexKind,
    segments: Vec<(u64, Arc<SegmentTermIndex>)>,
    section: Option<Arc<SectionAttributeReader>>,
}

impl TermIndexReader {
    pub fn open(config: &IndexConfig, segments: &[SegmentSource], cache: &ReaderCache) -> Result<Self> {
        let namespace = format!("term:{}", config.name);
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            let part = cache.get_or_build(&namespace, segment.id, segment.doc_count(), || {
                Ok(SegmentTermIndex::build(config.kind, &config.field, &segment.data))
            })?;
            parts.push((segment.base_doc_id, part));
        }

        Ok(TermIndexReader {
            name: config.name.clone(),
            kind: config.kind,
            segments: parts,
            section: None,
        })
    }
}

impl IndexReader for TermIndexReader {
    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn lookup(&self, term: &Term) -> Result<Vec<DocId>> {
        match term {
            Term::Word(word) => {
                let keys = index_terms(self.kind, word);
                let Some(key) = keys.first() else {
                    return Ok(Vec::new());
                };
                let mut docs = Vec::new();
                for (base, index) in &self.segments {
                    if let Some(list) = index.postings.get(key) {
                        docs.extend(list.iter().map(|l| DocId(base + *l as u64)));
                    }
                }
                Ok(docs)
            }
            Term::Prefix(prefix) => {
                let prefix = prefix.to_lowercase();
                let mut docs = Vec::new();
                for (base, index) in &self.segments {
                    let mut locals: Vec<LocalDocId> = index
                        .postings
                        .range(prefix.clone()..)
                        .take_while(|(k, _)| k.starts_with(&prefix))
                        .flat_map(|(_, list)| list.iter().copied())
                        .collect();
                    locals.sort_unstable();
                    locals.dedup();
                    docs.extend(locals.into_iter().map(|l| DocId(base + l as u64)));
                }
                Ok(docs)
            }
            Term::Range { .. } => Err(Error::invalid_argument(format!(
                "range term on {} index {}", self.kind.name(), self.name
            ))),
        }
    }

    fn section_reader(&self) -> Option<Arc<SectionAttributeReader>> {
        self.section.clone()
    }

    fn attach_accessory(&mut self, accessory: &AccessoryReader) {
        self.section = accessory.section_reader(&self.name);
    }

    fn clone_reader(&self) -> Box<dyn IndexReader> {
        Box::new(self.clone())
    }

    fn estimate_load_size(&self) -> usize {
        self.segments.iter().map(|(_, s)| s.estimate_size()).sum()
    }
}
