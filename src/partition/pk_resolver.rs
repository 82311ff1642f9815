use std::collections::HashMap;
use crate::core::types::LocalDocId;
use crate::storage::segment::SegmentId;
use crate::storage::version::Version;

/// How a realtime document and an on-disk document with the same timestamp
/// are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampTiePolicy {
    /// The incremental build already holds the write; the realtime copy is
    /// obsolete. Version format 2.
    IncrementalWins,
    /// A realtime chain written entirely at the incremental timestamp is
    /// kept. Version format 1.
    PreserveRealtimeChain,
}

impl TimestampTiePolicy {
    pub fn for_format(format_version: u32) -> Self {
        if format_version <= 1 {
            TimestampTiePolicy::PreserveRealtimeChain
        } else {
            TimestampTiePolicy::IncrementalWins
        }
    }

    /// Policy for `version`, unless `override_format` pins one.
    pub fn resolve(version: &Version, override_format: Option<u32>) -> Self {
        Self::for_format(override_format.unwrap_or(version.format_version))
    }

    /// Whether a realtime write at `realtime_ts` replaces an on-disk
    /// document at `disk_ts`.
    pub fn realtime_supersedes(&self, realtime_ts: i64, disk_ts: i64) -> bool {
        match self {
            TimestampTiePolicy::IncrementalWins => realtime_ts > disk_ts,
            TimestampTiePolicy::PreserveRealtimeChain => realtime_ts >= disk_ts,
        }
    }

    /// Whether a realtime document whose key the incremental build covers
    /// is trimmed. `chain_at_tie` is true when every realtime document for
    /// the key carries exactly the incremental timestamp.
    pub fn trims(&self, doc_ts: i64, incremental_ts: i64, chain_at_tie: bool) -> bool {
        match self {
            TimestampTiePolicy::IncrementalWins => doc_ts <= incremental_ts,
            TimestampTiePolicy::PreserveRealtimeChain => {
                doc_ts < incremental_ts || (doc_ts == incremental_ts && !chain_at_tie)
            }
        }
    }

    /// Whether the incremental locator is the one to resume from when both
    /// point at the same offset.
    pub fn incremental_covers(&self, incremental_ts: i64, realtime_offset: i64) -> bool {
        match self {
            TimestampTiePolicy::IncrementalWins => incremental_ts >= realtime_offset,
            TimestampTiePolicy::PreserveRealtimeChain => incremental_ts > realtime_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocLocation {
    pub segment_id: SegmentId,
    pub local_doc_id: LocalDocId,
    pub timestamp: i64,
    pub on_disk: bool,
}

impl DocLocation {
    pub fn on_disk(segment_id: SegmentId, local_doc_id: LocalDocId, timestamp: i64) -> Self {
        DocLocation { segment_id, local_doc_id, timestamp, on_disk: true }
    }

    pub fn realtime(segment_id: SegmentId, local_doc_id: LocalDocId, timestamp: i64) -> Self {
        DocLocation { segment_id, local_doc_id, timestamp, on_disk: false }
    }
}

/// Tracks the current document of every primary key and decides which
/// documents each write kills. Callers apply the returned kills to the
/// deletion map.
#[derive(Debug, Clone)]
pub struct PrimaryKeyResolver {
    pub policy: TimestampTiePolicy,
    current: HashMap<String, DocLocation>,
}

impl PrimaryKeyResolver {
    pub fn new(policy: TimestampTiePolicy) -> Self {
        PrimaryKeyResolver {
            policy,
            current: HashMap::new(),
        }
    }

    pub fn current(&self, primary_key: &str) -> Option<DocLocation> {
        self.current.get(primary_key).copied()
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// On-disk segments are applied oldest first, so a later document
    /// always kills the earlier one. A document that is already deleted
    /// does not become current but still kills its predecessor.
    pub fn apply_disk_add(&mut self, primary_key: &str, location: DocLocation, already_deleted: bool) -> Option<DocLocation> {
        if already_deleted {
            self.current.remove(primary_key)
        } else {
            self.current.insert(primary_key.to_string(), location)
        }
    }

    /// Deletion record of an on-disk segment.
    pub fn apply_disk_delete(&mut self, primary_key: &str) -> Option<DocLocation> {
        self.current.remove(primary_key)
    }

    /// Realtime add. Returns the document to kill: the previous current doc,
    /// or the new one when an on-disk document outranks it.
    pub fn apply_realtime_add(&mut self, primary_key: &str, location: DocLocation) -> Option<DocLocation> {
        match self.current.get(primary_key).copied() {
            Some(existing) if existing.on_disk && !self.policy.realtime_supersedes(location.timestamp, existing.timestamp) => {
                Some(location)
            }
            _ => self.current.insert(primary_key.to_string(), location),
        }
    }

    /// Realtime delete. A realtime current doc is always killed; an on-disk
    /// one only when the delete is newer under the tie policy.
    pub fn apply_realtime_delete(&mut self, primary_key: &str, timestamp: i64) -> Option<DocLocation> {
        let existing = self.current.get(primary_key).copied()?;
        if existing.on_disk && !self.policy.realtime_supersedes(timestamp, existing.timestamp) {
            return None;
        }
        self.current.remove(primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(seq: i64, local: u32, ts: i64) -> DocLocation {
        DocLocation::realtime(SegmentId::realtime(seq), local, ts)
    }

    #[test]
    fn tie_goes_to_incremental_in_format_two() {
        let mut resolver = PrimaryKeyResolver::new(TimestampTiePolicy::for_format(2));
        resolver.apply_disk_add("a", DocLocation::on_disk(SegmentId(0), 0, 5), false);

        let loser = rt(0, 0, 5);
        assert_eq!(resolver.apply_realtime_add("a", loser), Some(loser));
        assert!(resolver.current("a").unwrap().on_disk);

        let winner = rt(0, 1, 6);
        assert_eq!(resolver.apply_realtime_add("a", winner).map(|l| l.on_disk), Some(true));
        assert_eq!(resolver.current("a"), Some(winner));
    }

    #[test]
    fn tie_goes_to_realtime_in_format_one() {
        let mut resolver = PrimaryKeyResolver::new(TimestampTiePolicy::for_format(1));
        resolver.apply_disk_add("a", DocLocation::on_disk(SegmentId(0), 0, 5), false);
        assert_eq!(resolver.apply_realtime_delete("a", 5).map(|l| l.segment_id), Some(SegmentId(0)));
        assert!(resolver.current("a").is_none());
    }

    #[test]
    fn stale_delete_keeps_disk_doc() {
        let mut resolver = PrimaryKeyResolver::new(TimestampTiePolicy::IncrementalWins);
        resolver.apply_disk_add("a", DocLocation::on_disk(SegmentId(0), 0, 5), false);
        assert_eq!(resolver.apply_realtime_delete("a", 3), None);
        assert!(resolver.current("a").is_some());
    }

    #[test]
    fn deleted_disk_doc_kills_predecessor_only() {
        let mut resolver = PrimaryKeyResolver::new(TimestampTiePolicy::IncrementalWins);
        let old = DocLocation::on_disk(SegmentId(0), 0, 1);
        resolver.apply_disk_add("a", old, false);
        assert_eq!(resolver.apply_disk_add("a", DocLocation::on_disk(SegmentId(1), 0, 2), true), Some(old));
        assert!(resolver.current("a").is_none());
    }

    #[test]
    fn trimming_rule_per_policy() {
        let newer = TimestampTiePolicy::IncrementalWins;
        assert!(newer.trims(5, 5, true));
        assert!(!newer.trims(6, 5, false));

        let chain = TimestampTiePolicy::PreserveRealtimeChain;
        assert!(chain.trims(4, 5, true));
        assert!(!chain.trims(5, 5, true));
        assert!(chain.trims(5, 5, false));
    }
}
