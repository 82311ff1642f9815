use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;
use tracing::warn;
use crate::core::types::{DocId, FieldValue};
use crate::index::attribute_reader::{AttributeReader, AttributeReaderSet};
use crate::index::index_reader::SegmentSource;
use crate::schema::schema::{SortDescription, SortOrder};
use crate::storage::segment::SegmentKind;

/// Narrows a value range on the leading sort field to doc id ranges.
///
/// Built segments are sorted by the offline build and are binary searched;
/// realtime and building segments are unsorted and always match whole.
pub struct SortedDocIdRangeSearcher {
    pub sort: Option<SortDescription>,
    attribute: Option<Arc<AttributeReader>>,
    segments: Vec<SegmentSource>,
}

impl SortedDocIdRangeSearcher {
    pub fn open(sorts: &[SortDescription], attributes: &AttributeReaderSet, segments: &[SegmentSource]) -> Self {
        let leading = sorts.first().cloned();
        let attribute = leading.as_ref().and_then(|s| {
            let reader = attributes.get(&s.field);
            if reader.is_none() {
                warn!(field = %s.field, "sort field has no attribute, range search falls back to full scan");
            }
            reader
        });
        SortedDocIdRangeSearcher {
            sort: leading,
            attribute,
            segments: segments.to_vec(),
        }
    }

    /// Doc id ranges that may hold values in `[from, to]`.
    pub fn get_doc_id_ranges(&self, from: &FieldValue, to: &FieldValue) -> Vec<Range<DocId>> {
        let mut ranges = Vec::new();
        for segment in &self.segments {
            let full = segment.base_doc_id..segment.base_doc_id + segment.doc_count();
            let range = match (&self.sort, &self.attribute, segment.kind) {
                (Some(sort), Some(attribute), SegmentKind::Built) => {
                    self.search_segment(segment, sort.order, attribute, from, to)
                }
                _ => full,
            };
            if range.start < range.end {
                ranges.push(DocId(range.start)..DocId(range.end));
            }
        }
        ranges
    }

    fn search_segment(
        &self,
        segment: &SegmentSource,
        order: SortOrder,
        attribute: &AttributeReader,
        from: &FieldValue,
        to: &FieldValue,
    ) -> Range<u64> {
        let base = segment.base_doc_id;
        let count = segment.doc_count();
        let value = |local: u64| attribute.get(DocId(base + local));
        // Missing values sort last, so every lookup treats them as past the range.
        let cmp = |local: u64, bound: &FieldValue| value(local).and_then(|v| v.compare(bound));

        let (start, end) = match order {
            SortOrder::Ascending => (
                lower_bound(count, |l| !matches!(cmp(l, from), Some(Ordering::Less))),
                lower_bound(count, |l| !matches!(cmp(l, to), Some(Ordering::Less | Ordering::Equal))),
            ),
            SortOrder::Descending => (
                lower_bound(count, |l| !matches!(cmp(l, to), Some(Ordering::Greater))),
                lower_bound(count, |l| !matches!(cmp(l, from), Some(Ordering::Greater | Ordering::Equal))),
            ),
        };
        base + start..base + end.max(start)
    }
}

/// First position in `0..n` where `pred` holds; `pred` must be monotonic.
fn lower_bound<F: Fn(u64) -> bool>(n: u64, pred: F) -> u64 {
    let (mut lo, mut hi) = (0u64, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}
