use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use crate::core::error::Result;
use crate::core::types::{DocId, FieldValue};
use crate::index::index_reader::{locate_index, SegmentSource};
use crate::index::reader_cache::ReaderCache;
use crate::schema::schema::PackAttributeConfig;

pub type AttributeColumn = Vec<Option<FieldValue>>;

fn build_column(field: &str, segment: &SegmentSource) -> AttributeColumn {
    segment
        .data
        .documents
        .iter()
        .map(|d| d.fields.get(field).cloned())
        .collect()
}

struct AttributeSegment {
    source: SegmentSource,
    column: OnceLock<Arc<AttributeColumn>>,
}

/// Column reader for one attribute field.
///
/// A lazy reader materializes a segment's column on first access instead of
/// at snapshot build time.
pub struct AttributeReader {
    pub field: String,
    pub lazy: bool,
    segments: Vec<AttributeSegment>,
    sources: Vec<SegmentSource>,
}

impl AttributeReader {
    pub fn open(field: &str, segments: &[SegmentSource], lazy: bool, cache: &ReaderCache) -> Result<Self> {
        let namespace = format!("attribute:{}", field);
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            let column = OnceLock::new();
            if !lazy {
                let built = cache.get_or_build(&namespace, segment.id, segment.doc_count(), || {
                    Ok(build_column(field, segment))
                })?;
                let _ = column.set(built);
            }
            parts.push(AttributeSegment {
                source: segment.clone(),
                column,
            });
        }
        Ok(AttributeReader {
            field: field.to_string(),
            lazy,
            segments: parts,
            sources: segments.to_vec(),
        })
    }

    pub fn get(&self, doc: DocId) -> Option<FieldValue> {
        let (idx, local) = locate_index(&self.sources, doc)?;
        let segment = &self.segments[idx];
        let column = segment
            .column
            .get_or_init(|| Arc::new(build_column(&self.field, &segment.source)));
        column.get(local as usize).cloned().flatten()
    }

    /// Segments whose column is in memory.
    pub fn loaded_segment_count(&self) -> usize {
        self.segments.iter().filter(|s| s.column.get().is_some()).count()
    }

    pub fn segment_sources(&self) -> &[SegmentSource] {
        &self.sources
    }
}

/// Several attribute fields stored together.
///
/// Without `need_pack_reader` only the flat per-field readers are exposed.
pub struct PackAttributeReader {
    pub name: String,
    pub fields: Vec<String>,
    readers: Vec<Arc<AttributeReader>>,
}

impl PackAttributeReader {
    pub fn get(&self, doc: DocId) -> Vec<(String, Option<FieldValue>)> {
        self.fields
            .iter()
            .cloned()
            .zip(self.readers.iter().map(|r| r.get(doc)))
            .collect()
    }

    pub fn field_reader(&self, field: &str) -> Option<Arc<AttributeReader>> {
        self.fields.iter().position(|f| f == field).map(|i| self.readers[i].clone())
    }
}

/// Attribute readers of one snapshot.
#[derive(Default)]
pub struct AttributeReaderSet {
    pub readers: HashMap<String, Arc<AttributeReader>>,
    pub packs: HashMap<String, Arc<PackAttributeReader>>,
}

impl AttributeReaderSet {
    pub fn new() -> Self {
        AttributeReaderSet::default()
    }

    pub fn add(&mut self, reader: AttributeReader) {
        self.readers.insert(reader.field.clone(), Arc::new(reader));
    }

    /// Registers each pack field as a flat reader, and the pack itself when
    /// it needs a pack reader.
    pub fn add_pack(
        &mut self,
        config: &PackAttributeConfig,
        segments: &[SegmentSource],
        lazy: bool,
        cache: &ReaderCache,
    ) -> Result<()> {
        let mut readers = Vec::with_capacity(config.fields.len());
        for field in &config.fields {
            let reader = match self.readers.get(field) {
                Some(existing) => existing.clone(),
                None => {
                    let reader = Arc::new(AttributeReader::open(field, segments, lazy, cache)?);
                    self.readers.insert(field.clone(), reader.clone());
                    reader
                }
            };
            readers.push(reader);
        }
        if config.need_pack_reader {
            self.packs.insert(
                config.name.clone(),
                Arc::new(PackAttributeReader {
                    name: config.name.clone(),
                    fields: config.fields.clone(),
                    readers,
                }),
            );
        }
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<Arc<AttributeReader>> {
        self.readers.get(field).cloned()
    }

    pub fn pack(&self, name: &str) -> Option<Arc<PackAttributeReader>> {
        self.packs.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
