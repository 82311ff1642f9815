use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::types::{Document, LocalDocId};
use crate::partition::data_view::{SegmentStorage, ViewSegment};
use crate::storage::operation_log::OperationEntry;
use crate::storage::segment::{DocumentBlocks, SegmentData, SegmentId, SegmentInfo, SegmentKind, StoredDocument};

/// The one mutable segment accepting realtime writes.
///
/// Appends only. New documents wait in `pending` until `freeze` moves them
/// into the shared blocks; the frozen data is reused until the next append.
pub struct BuildingSegment {
    pub id: SegmentId,
    pub schema_version_id: i32,
    pub has_sub_documents: bool,
    documents: DocumentBlocks,
    pending: Vec<StoredDocument>,
    sub_documents: DocumentBlocks,
    pending_subs: Vec<StoredDocument>,
    sub_doc_ends: Vec<LocalDocId>,
    operations: Vec<OperationEntry>,
    frozen: Option<Arc<SegmentData>>,
    storage: Arc<RwLock<SegmentStorage>>,
    memory_use: usize,
}

impl BuildingSegment {
    pub fn new(id: SegmentId, schema_version_id: i32, has_sub_documents: bool) -> Self {
        BuildingSegment {
            id,
            schema_version_id,
            has_sub_documents,
            documents: DocumentBlocks::new(),
            pending: Vec::new(),
            sub_documents: DocumentBlocks::new(),
            pending_subs: Vec::new(),
            sub_doc_ends: Vec::new(),
            operations: Vec::new(),
            frozen: None,
            storage: Arc::new(RwLock::new(SegmentStorage::InMemory)),
            memory_use: 0,
        }
    }

    /// Appends `doc` and returns its local id.
    pub fn add_document(&mut self, doc: &Document) -> LocalDocId {
        let stored = StoredDocument::from_document(doc);
        self.memory_use += stored.estimated_size();
        self.pending.push(stored);

        if self.has_sub_documents {
            for sub in &doc.sub_documents {
                let stored = StoredDocument::from_document(sub);
                self.memory_use += stored.estimated_size();
                self.pending_subs.push(stored);
            }
            let sub_count = self.sub_documents.len() + self.pending_subs.len();
            self.sub_doc_ends.push(sub_count as LocalDocId);
        }

        self.frozen = None;
        (self.doc_count() - 1) as LocalDocId
    }

    pub fn record(&mut self, entry: OperationEntry) {
        self.memory_use += 64;
        self.operations.push(entry);
    }

    pub fn operations(&self) -> &[OperationEntry] {
        &self.operations
    }

    pub fn replace_operations(&mut self, operations: Vec<OperationEntry>) {
        self.operations = operations;
    }

    pub fn document(&self, local: LocalDocId) -> Option<&StoredDocument> {
        let local = local as usize;
        match local.checked_sub(self.documents.len()) {
            Some(pending) => self.pending.get(pending),
            None => self.documents.get(local),
        }
    }

    pub fn doc_count(&self) -> u64 {
        (self.documents.len() + self.pending.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count() == 0 && self.operations.is_empty()
    }

    pub fn memory_use(&self) -> usize {
        self.memory_use
    }

    pub fn freeze(&mut self) -> Arc<SegmentData> {
        if let Some(frozen) = &self.frozen {
            return frozen.clone();
        }
        self.documents.append(std::mem::take(&mut self.pending));
        self.sub_documents.append(std::mem::take(&mut self.pending_subs));

        let sub_segment = if self.has_sub_documents {
            let info = SegmentInfo::new(self.id, SegmentKind::Building, self.schema_version_id);
            Some(Arc::new(SegmentData::from_blocks(info, self.sub_documents.clone(), Vec::new(), None, Vec::new())))
        } else {
            None
        };
        let info = SegmentInfo::new(self.id, SegmentKind::Building, self.schema_version_id);
        let data = Arc::new(SegmentData::from_blocks(
            info,
            self.documents.clone(),
            Vec::new(),
            sub_segment,
            self.sub_doc_ends.clone(),
        ));
        self.frozen = Some(data.clone());
        data
    }

    /// Current contents as a view segment.
    pub fn view_segment(&mut self) -> ViewSegment {
        ViewSegment {
            data: self.freeze(),
            kind: SegmentKind::Building,
            storage: self.storage.clone(),
            operations: Arc::new(self.operations.clone()),
        }
    }

    /// Turns the segment into an immutable realtime segment carrying the
    /// operations it hosted.
    pub fn seal(mut self) -> ViewSegment {
        let frozen = self.freeze();
        let mut info = frozen.info.clone();
        info.kind = SegmentKind::Realtime;
        info.locator = self.operations.last().map(|e| e.locator);
        let data = Arc::new(SegmentData::from_blocks(
            info,
            frozen.documents.clone(),
            Vec::new(),
            frozen.sub_segment.clone(),
            frozen.sub_doc_ends.clone(),
        ));
        ViewSegment {
            data,
            kind: SegmentKind::Realtime,
            storage: self.storage,
            operations: Arc::new(self.operations),
        }
    }
}
