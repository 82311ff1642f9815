use std::ops::Range;
use crate::core::types::{DocId, LocalDocId};
use crate::index::index_reader::{locate_index, SegmentSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDirection {
    MainToSub,
    SubToMain,
}

#[derive(Debug, Clone)]
struct JoinSegment {
    joined_base: u64,
    ends: Vec<LocalDocId>,
}

/// Doc id join between a main partition and its sub partition.
///
/// Each side is opened with the other side's base doc ids, so it answers in
/// the joined partition's global id space.
#[derive(Debug, Clone)]
pub struct JoinDocIdReader {
    pub direction: JoinDirection,
    own: Vec<SegmentSource>,
    segments: Vec<JoinSegment>,
}

impl JoinDocIdReader {
    /// `main` and `sub` are aligned segment by segment; `sub[i]` holds the
    /// sub documents of `main[i]`.
    pub fn open(direction: JoinDirection, main: &[SegmentSource], sub: &[SegmentSource]) -> Self {
        let segments = main
            .iter()
            .zip(sub.iter())
            .map(|(m, s)| JoinSegment {
                joined_base: match direction {
                    JoinDirection::MainToSub => s.base_doc_id,
                    JoinDirection::SubToMain => m.base_doc_id,
                },
                ends: m.data.sub_doc_ends.clone(),
            })
            .collect();
        let own = match direction {
            JoinDirection::MainToSub => main.to_vec(),
            JoinDirection::SubToMain => sub.to_vec(),
        };
        JoinDocIdReader {
            direction,
            own,
            segments,
        }
    }

    /// Sub doc ids of main document `doc`.
    pub fn sub_docs(&self, doc: DocId) -> Range<DocId> {
        debug_assert_eq!(self.direction, JoinDirection::MainToSub);
        let Some((idx, local)) = locate_index(&self.own, doc) else {
            return DocId(0)..DocId(0);
        };
        let segment = &self.segments[idx];
        let end = segment.ends.get(local as usize).copied().unwrap_or(0);
        let start = if local == 0 {
            0
        } else {
            segment.ends.get(local as usize - 1).copied().unwrap_or(end)
        };
        DocId(segment.joined_base + start as u64)..DocId(segment.joined_base + end as u64)
    }

    /// Main doc id owning sub document `doc`.
    pub fn main_doc(&self, doc: DocId) -> Option<DocId> {
        debug_assert_eq!(self.direction, JoinDirection::SubToMain);
        let (idx, local) = locate_index(&self.own, doc)?;
        let segment = &self.segments[idx];
        let main_local = segment.ends.partition_point(|end| *end <= local);
        if main_local >= segment.ends.len() {
            return None;
        }
        Some(DocId(segment.joined_base + main_local as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use crate::storage::segment::{SegmentData, SegmentId, SegmentInfo, SegmentKind, StoredDocument};

    fn docs(n: usize) -> Vec<StoredDocument> {
        (0..n)
            .map(|i| StoredDocument {
                primary_key: i.to_string(),
                timestamp: 0,
                fields: HashMap::new(),
            })
            .collect()
    }

    fn pair(id: i64, main_base: u64, sub_base: u64, ends: Vec<u32>) -> (SegmentSource, SegmentSource) {
        let sub_count = ends.last().copied().unwrap_or(0) as usize;
        let info = || SegmentInfo::new(SegmentId(id), SegmentKind::Built, 0);
        let sub = Arc::new(SegmentData::new(info(), docs(sub_count), Vec::new(), None, Vec::new()));
        let main = Arc::new(SegmentData::new(info(), docs(ends.len()), Vec::new(), Some(sub.clone()), ends));
        (
            SegmentSource { id: SegmentId(id), kind: SegmentKind::Built, base_doc_id: main_base, data: main },
            SegmentSource { id: SegmentId(id), kind: SegmentKind::Built, base_doc_id: sub_base, data: sub },
        )
    }

    #[test]
    fn join_maps_both_ways() {
        let (m0, s0) = pair(0, 0, 0, vec![2, 3]);
        let (m1, s1) = pair(1, 2, 3, vec![0, 2]);
        let main = vec![m0, m1];
        let sub = vec![s0, s1];

        let to_sub = JoinDocIdReader::open(JoinDirection::MainToSub, &main, &sub);
        assert_eq!(to_sub.sub_docs(DocId(0)), DocId(0)..DocId(2));
        assert_eq!(to_sub.sub_docs(DocId(2)), DocId(3)..DocId(3));
        assert_eq!(to_sub.sub_docs(DocId(3)), DocId(3)..DocId(5));

        let to_main = JoinDocIdReader::open(JoinDirection::SubToMain, &main, &sub);
        assert_eq!(to_main.main_doc(DocId(2)), Some(DocId(1)));
        assert_eq!(to_main.main_doc(DocId(4)), Some(DocId(3)));
        assert_eq!(to_main.main_doc(DocId(9)), None);
    }
}
