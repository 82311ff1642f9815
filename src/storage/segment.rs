use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::core::types::{Document, FieldValue, Locator, LocalDocId};

/// Realtime segment ids carry this tag so they never collide with ids handed
/// out by the offline build.
pub const REALTIME_SEGMENT_MASK: i64 = 0x2000_0000;

/// Largest sequence either id space can hold without touching the tag bit.
pub const MAX_SEGMENT_SEQUENCE: i64 = REALTIME_SEGMENT_MASK - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub i64);

impl SegmentId {
    pub fn built(id: i64) -> Self {
        debug_assert!((0..=MAX_SEGMENT_SEQUENCE).contains(&id), "built segment id {} out of range", id);
        SegmentId(id)
    }

    pub fn realtime(sequence: i64) -> Self {
        debug_assert!(
            (0..=MAX_SEGMENT_SEQUENCE).contains(&sequence),
            "realtime sequence {} out of range",
            sequence
        );
        SegmentId(REALTIME_SEGMENT_MASK | sequence)
    }

    pub fn checked_built(id: i64) -> Result<Self> {
        if !(0..=MAX_SEGMENT_SEQUENCE).contains(&id) {
            return Err(Error::invalid_argument(format!(
                "built segment id {} outside 0..={}",
                id, MAX_SEGMENT_SEQUENCE
            )));
        }
        Ok(SegmentId(id))
    }

    /// Fails once the sequence would spill into the tag bit, where it could
    /// alias another realtime or built id.
    pub fn checked_realtime(sequence: i64) -> Result<Self> {
        if !(0..=MAX_SEGMENT_SEQUENCE).contains(&sequence) {
            return Err(Error::invalid_argument(format!(
                "realtime sequence {} outside 0..={}",
                sequence, MAX_SEGMENT_SEQUENCE
            )));
        }
        Ok(SegmentId(REALTIME_SEGMENT_MASK | sequence))
    }

    /// True when the id decodes back to exactly one of the two id spaces.
    pub fn is_well_formed(&self) -> bool {
        self.0 >= 0 && self.sequence() <= MAX_SEGMENT_SEQUENCE
    }

    pub fn is_realtime(&self) -> bool {
        self.0 & REALTIME_SEGMENT_MASK != 0
    }

    /// Untagged sequence number.
    pub fn sequence(&self) -> i64 {
        self.0 & !REALTIME_SEGMENT_MASK
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Built,
    Building,
    Realtime,
}

/// Segment metadata, persisted as `segment_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub doc_count: u64,
    pub kind: SegmentKind,
    pub max_timestamp: i64,
    pub locator: Option<Locator>,
    pub schema_version_id: i32,
    pub created_at: DateTime<Utc>,
}

impl SegmentInfo {
    pub fn new(id: SegmentId, kind: SegmentKind, schema_version_id: i32) -> Self {
        SegmentInfo {
            id,
            doc_count: 0,
            kind,
            max_timestamp: i64::MIN,
            locator: None,
            schema_version_id,
            created_at: Utc::now(),
        }
    }
}

/// One stored document inside a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub primary_key: String,
    pub timestamp: i64,
    pub fields: HashMap<String, FieldValue>,
}

impl StoredDocument {
    pub fn from_document(doc: &Document) -> Self {
        StoredDocument {
            primary_key: doc.primary_key.clone(),
            timestamp: doc.timestamp,
            fields: doc.fields.clone(),
        }
    }

    pub fn estimated_size(&self) -> usize {
        self.primary_key.len()
            + 16
            + self.fields.iter().map(|(k, v)| k.len() + v.estimated_size()).sum::<usize>()
    }
}

/// A primary key deleted by the offline build in segments older than the one
/// carrying the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRecord {
    pub primary_key: String,
    pub timestamp: i64,
}

/// Append-only document list held as shared blocks.
///
/// Clones share every block. An append merges trailing blocks no larger than
/// the merged result, so a list grown one document at a time keeps
/// O(log n) blocks and copies each document O(log n) times.
#[derive(Clone, Default)]
pub struct DocumentBlocks {
    blocks: Vec<Arc<[StoredDocument]>>,
    starts: Vec<usize>,
    len: usize,
    memory_use: usize,
    max_timestamp: Option<i64>,
}

impl DocumentBlocks {
    pub fn new() -> Self {
        DocumentBlocks::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn memory_use(&self) -> usize {
        self.memory_use
    }

    pub fn max_timestamp(&self) -> Option<i64> {
        self.max_timestamp
    }

    pub fn append(&mut self, documents: Vec<StoredDocument>) {
        if documents.is_empty() {
            return;
        }
        for doc in &documents {
            self.memory_use += doc.estimated_size();
            self.max_timestamp = self.max_timestamp.max(Some(doc.timestamp));
        }
        self.len += documents.len();

        let mut block = documents;
        while self.blocks.last().is_some_and(|last| last.len() <= block.len()) {
            if let Some(last) = self.blocks.pop() {
                self.starts.pop();
                let mut merged = Vec::with_capacity(last.len() + block.len());
                merged.extend(last.iter().cloned());
                merged.append(&mut block);
                block = merged;
            }
        }
        let start = match (self.starts.last(), self.blocks.last()) {
            (Some(start), Some(last)) => start + last.len(),
            _ => 0,
        };
        self.starts.push(start);
        self.blocks.push(Arc::from(block));
    }

    pub fn get(&self, index: usize) -> Option<&StoredDocument> {
        if index >= self.len {
            return None;
        }
        let block = self.starts.partition_point(|&start| start <= index).checked_sub(1)?;
        self.blocks[block].get(index - self.starts[block])
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredDocument> + '_ {
        self.blocks.iter().flat_map(|block| block.iter())
    }
}

impl From<Vec<StoredDocument>> for DocumentBlocks {
    fn from(documents: Vec<StoredDocument>) -> Self {
        let mut blocks = DocumentBlocks::new();
        blocks.append(documents);
        blocks
    }
}

impl PartialEq for DocumentBlocks {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl fmt::Debug for DocumentBlocks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Immutable payload of a segment.
///
/// Sub documents live in `sub_segment`; `sub_doc_ends[i]` is the exclusive
/// end of main document `i`'s range there.
#[derive(Debug, Clone)]
pub struct SegmentData {
    pub info: SegmentInfo,
    pub documents: DocumentBlocks,
    pub deletions: Vec<DeleteRecord>,
    pub sub_segment: Option<Arc<SegmentData>>,
    pub sub_doc_ends: Vec<LocalDocId>,
    memory_use: usize,
}

impl SegmentData {
    pub fn new(
        info: SegmentInfo,
        documents: Vec<StoredDocument>,
        deletions: Vec<DeleteRecord>,
        sub_segment: Option<Arc<SegmentData>>,
        sub_doc_ends: Vec<LocalDocId>,
    ) -> Self {
        SegmentData::from_blocks(info, documents.into(), deletions, sub_segment, sub_doc_ends)
    }

    /// Like `new`, sharing the blocks of an existing document list.
    pub fn from_blocks(
        mut info: SegmentInfo,
        documents: DocumentBlocks,
        deletions: Vec<DeleteRecord>,
        sub_segment: Option<Arc<SegmentData>>,
        sub_doc_ends: Vec<LocalDocId>,
    ) -> Self {
        info.doc_count = documents.len() as u64;
        if let Some(max) = documents.max_timestamp() {
            info.max_timestamp = info.max_timestamp.max(max);
        }
        let memory_use = documents.memory_use()
            + deletions.iter().map(|d| d.primary_key.len() + 8).sum::<usize>()
            + sub_segment.as_ref().map(|s| s.memory_use()).unwrap_or(0)
            + sub_doc_ends.len() * 4;
        SegmentData {
            info,
            documents,
            deletions,
            sub_segment,
            sub_doc_ends,
            memory_use,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.info.id
    }

    pub fn doc_count(&self) -> u64 {
        self.documents.len() as u64
    }

    pub fn memory_use(&self) -> usize {
        self.memory_use
    }

    pub fn document(&self, local: LocalDocId) -> Option<&StoredDocument> {
        self.documents.get(local as usize)
    }

    /// Range of sub documents joined to main document `local`.
    pub fn sub_doc_range(&self, local: LocalDocId) -> std::ops::Range<LocalDocId> {
        let end = self.sub_doc_ends.get(local as usize).copied().unwrap_or(0);
        let start = if local == 0 {
            0
        } else {
            self.sub_doc_ends.get(local as usize - 1).copied().unwrap_or(end)
        };
        start..end
    }
}
