use std::collections::HashMap;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;
use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::index::index_reader::{locate_index, SegmentSource};
use crate::index::reader_cache::ReaderCache;
use crate::schema::schema::{FieldType, Schema};

/// Per-document token counts of one indexed text field.
#[derive(Debug, Clone)]
pub struct SectionAttributeReader {
    pub index_name: String,
    segments: Vec<SegmentSource>,
    lengths: Vec<Arc<Vec<u32>>>,
}

impl SectionAttributeReader {
    pub fn get(&self, doc: DocId) -> Option<u32> {
        let (idx, local) = locate_index(&self.segments, doc)?;
        self.lengths[idx].get(local as usize).copied()
    }

    pub fn estimate_load_size(&self) -> usize {
        self.lengths.iter().map(|l| l.len() * 4).sum()
    }
}

/// Metadata shared across index readers, opened once per snapshot.
#[derive(Debug, Default)]
pub struct AccessoryReader {
    sections: HashMap<String, Arc<SectionAttributeReader>>,
}

impl AccessoryReader {
    pub fn open(schema: &Schema, segments: &[SegmentSource], cache: &ReaderCache) -> Result<Self> {
        let mut sections = HashMap::new();
        for index in schema.indexes.iter().filter(|i| i.has_section_attribute) {
            let field_type = schema.field(&index.field).map(|f| f.field_type);
            if field_type != Some(FieldType::Text) {
                return Err(Error::inconsistent(format!(
                    "section attribute of {} needs a text field", index.name
                )));
            }

            let namespace = format!("section:{}", index.name);
            let mut lengths = Vec::with_capacity(segments.len());
            for segment in segments {
                let part = cache.get_or_build(&namespace, segment.id, segment.doc_count(), || {
                    Ok(segment
                        .data
                        .documents
                        .iter()
                        .map(|d| {
                            d.fields
                                .get(&index.field)
                                .and_then(|v| v.as_text())
                                .map(|t| t.unicode_words().count() as u32)
                                .unwrap_or(0)
                        })
                        .collect::<Vec<u32>>())
                })?;
                lengths.push(part);
            }

            sections.insert(
                index.name.clone(),
                Arc::new(SectionAttributeReader {
                    index_name: index.name.clone(),
                    segments: segments.to_vec(),
                    lengths,
                }),
            );
        }
        Ok(AccessoryReader { sections })
    }

    pub fn section_reader(&self, index_name: &str) -> Option<Arc<SectionAttributeReader>> {
        self.sections.get(index_name).cloned()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}
