use std::collections::HashMap;
use std::sync::Arc;
use crate::core::types::{DocId, FieldValue};
use crate::index::attribute_reader::{AttributeReader, AttributeReaderSet};
use crate::index::index_reader::{locate, SegmentSource};

/// Stored fields returned for a hit.
///
/// Fields that are also attributes are read through the attribute readers
/// instead of the stored document.
pub struct SummaryReader {
    pub fields: Vec<String>,
    segments: Vec<SegmentSource>,
    attribute_fields: HashMap<String, Arc<AttributeReader>>,
}

impl SummaryReader {
    /// `None` when every summary field is disabled.
    pub fn open(fields: Vec<String>, segments: &[SegmentSource], attributes: &AttributeReaderSet) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let attribute_fields = fields
            .iter()
            .filter_map(|f| attributes.get(f).map(|r| (f.clone(), r)))
            .collect();
        Some(SummaryReader {
            fields,
            segments: segments.to_vec(),
            attribute_fields,
        })
    }

    pub fn get_document(&self, doc: DocId) -> Option<HashMap<String, FieldValue>> {
        let (segment, local) = locate(&self.segments, doc)?;
        let stored = segment.data.document(local)?;

        let mut summary = HashMap::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = match self.attribute_fields.get(field) {
                Some(reader) => reader.get(doc),
                None => stored.fields.get(field).cloned(),
            };
            if let Some(value) = value {
                summary.insert(field.clone(), value);
            }
        }
        Some(summary)
    }

    pub fn attribute_backed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.attribute_fields.keys().cloned().collect();
        fields.sort();
        fields
    }
}
