use std::collections::HashMap;
use crate::core::types::{DocId, FieldValue};
use crate::index::index_reader::{locate, SegmentSource};
use crate::schema::schema::SourceGroup;

/// Raw source fields grouped as the schema declares them.
pub struct SourceReader {
    pub groups: Vec<SourceGroup>,
    segments: Vec<SegmentSource>,
}

impl SourceReader {
    /// `None` when every source group is disabled.
    pub fn open(groups: Vec<SourceGroup>, segments: &[SegmentSource]) -> Option<Self> {
        if groups.is_empty() {
            return None;
        }
        Some(SourceReader {
            groups,
            segments: segments.to_vec(),
        })
    }

    pub fn get_group(&self, doc: DocId, group: &str) -> Option<HashMap<String, FieldValue>> {
        let group = self.groups.iter().find(|g| g.name == group)?;
        let (segment, local) = locate(&self.segments, doc)?;
        let stored = segment.data.document(local)?;
        Some(
            group
                .fields
                .iter()
                .filter_map(|f| stored.fields.get(f).map(|v| (f.clone(), v.clone())))
                .collect(),
        )
    }

    pub fn get_document(&self, doc: DocId) -> Option<HashMap<String, HashMap<String, FieldValue>>> {
        locate(&self.segments, doc)?;
        Some(
            self.groups
                .iter()
                .filter_map(|g| self.get_group(doc, &g.name).map(|v| (g.name.clone(), v)))
                .collect(),
        )
    }
}
