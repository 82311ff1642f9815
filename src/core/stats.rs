use serde::{Serialize, Deserialize};

/// Health of an online partition.
///
/// Quota problems are reported here instead of failing queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PartitionStatus {
    Healthy,
    ReachMaxRealtimeSize,
    ForceReopenRequired,
    Fatal(String),
}

impl PartitionStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, PartitionStatus::Healthy)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PartitionStatus::Fatal(_))
    }
}

/// Reader lifecycle statistics for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderStats {
    pub latest_version_id: i64,
    pub oldest_referenced_version_id: i64,
    pub live_reader_count: usize,
    pub realtime_segment_count: usize,
    pub realtime_memory_bytes: usize,
    pub status: PartitionStatus,
}
