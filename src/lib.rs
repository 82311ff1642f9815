pub mod core;
pub mod schema;
pub mod storage;
pub mod index;
pub mod memory;
pub mod reader;
pub mod partition;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::stats::{PartitionStatus, ReaderStats};
pub use crate::core::types::{DocId, Document, FieldValue, Locator};
pub use crate::partition::online_partition::OnlinePartition;
pub use crate::partition::reopen::{ReopenOutcome, ReopenTarget};
pub use crate::partition::writer::BuildStatus;
pub use crate::reader::partition_reader::PartitionReader;

/*
┌──────────────────────────── ONLINE PARTITION ─────────────────────────────┐
│                                                                           │
│  OnlinePartition                                                          │
│   ├── writer: PartitionWriter      on-disk segments + realtime chain      │
│   │     ├── BuildingSegment        accepts documents, sealed at maxDocs   │
│   │     ├── PrimaryKeyResolver     current doc per key, tie policy        │
│   │     └── DeletionMap            copy-on-write bitmaps per segment      │
│   ├── controller: ReopenController Serving -> Reopening -> Serving/Fatal  │
│   ├── builder: ReaderBuilder       PartitionDataView -> PartitionReader   │
│   ├── container: ReaderContainer   latest snapshot + live versions, GC    │
│   └── dumper: Dumper               links sealed segments in background    │
│                                                                           │
└───────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── REOPEN FLOW ──────────────────────────────────┐
│                                                                           │
│  incremental Version                                                      │
│      │ load new segments (reuse loaded ones)                              │
│      ▼                                                                    │
│  reconcile: resolve keys over disk, replay realtime ops, trim covered     │
│      │                                                                    │
│      ▼                                                                    │
│  prepared view ──> ReaderBuilder::build ──> publish ──> commit writer     │
│                          │ error                                          │
│                          ▼                                                │
│                  previous snapshot stays                                  │
│                                                                           │
└───────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────── ON DISK ──────────────────────────────────────┐
│  <root>/version.<id>                       ordered segment ids            │
│  <root>/segment_<id>_level_0/              segment_info, data, deletions  │
│  <root>/rt_index_partition/version.<id>    base ids + linked realtime ids │
│  <root>/rt_index_partition/segment_..._level_0/   + operation_log         │
└───────────────────────────────────────────────────────────────────────────┘
*/
