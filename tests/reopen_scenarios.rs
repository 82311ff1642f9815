mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use common::*;
use online_partition::core::types::Document;
use online_partition::partition::reopen::{ReopenOutcome, ReopenTarget};
use online_partition::partition::writer::BuildStatus;
use online_partition::storage::segment::SegmentId;

#[test]
fn incremental_replaces_realtime_copy_of_same_key() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello full")], 1);
    let partition = fx.open();

    assert_eq!(partition.build(&doc("2", 2, "hello realtime")).unwrap(), BuildStatus::Applied);
    let reader = partition.get_reader().unwrap();
    assert_eq!(search_keys(&reader, "hello"), vec!["1", "2"]);
    assert_eq!(title_of(&reader, "2").as_deref(), Some("hello realtime"));

    let version = fx.commit(vec![doc("2", 2, "hello incremental")], 2);
    let outcome = partition.incremental_arrived(version).unwrap();
    assert_eq!(outcome, ReopenOutcome::Adopted { version_id: 1 });

    let reader = partition.get_reader().unwrap();
    assert_eq!(search_keys(&reader, "hello"), vec!["1", "2"]);
    assert_eq!(visible_keys(&reader), vec!["1", "2"]);
    assert_eq!(title_of(&reader, "2").as_deref(), Some("hello incremental"));
}

#[test]
fn newer_realtime_delete_survives_older_incremental_add() {
    for format in [1, 2] {
        let mut fx = Fixture::with_format(basic_schema(), format);
        fx.commit(vec![doc("1", 1, "hello")], 1);
        let partition = fx.open();

        partition.build(&Document::delete("2", 3)).unwrap();
        let version = fx.commit(vec![doc("2", 2, "hello")], 2);
        partition.incremental_arrived(version).unwrap();

        let reader = partition.get_reader().unwrap();
        assert!(reader.lookup_primary_key("2").is_none(), "format {}", format);
        assert_eq!(search_keys(&reader, "hello"), vec!["1"], "format {}", format);
    }
}

#[test]
fn one_document_per_segment_keeps_only_latest_write() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("other", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    let partition = fx.open_with(config);

    for ts in 1..=3 {
        partition.build(&doc("a", ts, &format!("write {}", ts))).unwrap();
    }
    let reader = partition.get_reader().unwrap();
    assert_eq!(reader.version.segment_ids, vec![SegmentId::built(0)]);
    assert_eq!(visible_keys(&reader), vec!["a", "other"]);
    assert_eq!(title_of(&reader, "a").as_deref(), Some("write 3"));

    let version = fx.commit(vec![doc("a", 2, "incremental")], 2);
    partition.incremental_arrived(version).unwrap();

    let reader = partition.get_reader().unwrap();
    assert_eq!(visible_keys(&reader), vec!["a", "other"]);
    let pk = reader.lookup_primary_key("a").unwrap();
    assert_eq!(reader.get_timestamp(pk), Some(3));
    assert_eq!(title_of(&reader, "a").as_deref(), Some("write 3"));
    // The two trimmed single-document segments are gone.
    assert_eq!(partition.stats().realtime_segment_count, 1);
}

#[test]
fn held_snapshot_is_isolated_from_later_reopens() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let partition = Arc::new(fx.open());
    let held = partition.get_reader().unwrap();

    let (ready_tx, ready_rx) = mpsc::channel();
    let (check_tx, check_rx) = mpsc::channel::<()>();
    let query_thread = {
        let snapshot = held.clone();
        thread::spawn(move || {
            let before = search_keys(&snapshot, "hello");
            ready_tx.send(()).unwrap();
            check_rx.recv().unwrap();
            (before, search_keys(&snapshot, "hello"))
        })
    };

    ready_rx.recv().unwrap();
    let v1 = fx.commit(vec![doc("2", 2, "hello")], 2);
    partition.incremental_arrived(v1).unwrap();
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "2"]);

    partition.build(&Document::delete("1", 3)).unwrap();
    let v2 = fx.commit(vec![doc("3", 4, "hello")], 4);
    partition.incremental_arrived(v2).unwrap();
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["2", "3"]);

    check_tx.send(()).unwrap();
    let (before, after) = query_thread.join().unwrap();
    assert_eq!(before, vec!["1"]);
    assert_eq!(after, vec!["1"]);
    assert_eq!(search_keys(&held, "hello"), vec!["1"]);
    assert_eq!(held.version_id(), 0);
}

#[test]
fn old_version_segments_removed_once_unreferenced() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.keep_version_count = 1;
    let partition = fx.open_with(config);

    let v1 = fx.commit(vec![doc("2", 2, "hello")], 2);
    partition.incremental_arrived(v1).unwrap();
    let merged = fx.offline.merge(3).unwrap();
    partition.incremental_arrived(merged).unwrap();

    let layout = partition.layout();
    assert!(!layout.version_path(0).exists());
    assert!(!layout.version_path(1).exists());
    assert!(!layout.segment_path(SegmentId::built(0)).exists());
    assert!(!layout.segment_path(SegmentId::built(1)).exists());
    assert!(layout.segment_path(SegmentId::built(2)).exists());
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "2"]);
}

#[test]
fn live_snapshot_pins_its_segments() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.keep_version_count = 1;
    let partition = fx.open_with(config);

    let v1 = fx.commit(vec![doc("2", 2, "hello")], 2);
    partition.incremental_arrived(v1).unwrap();
    let held = partition.get_reader().unwrap();
    let merged = fx.offline.merge(3).unwrap();
    partition.incremental_arrived(merged).unwrap();

    let layout = partition.layout().clone();
    assert!(layout.version_path(1).exists());
    assert!(layout.segment_path(SegmentId::built(0)).exists());
    assert!(layout.segment_path(SegmentId::built(1)).exists());
    assert_eq!(partition.stats().oldest_referenced_version_id, 1);
    assert_eq!(search_keys(&held, "hello"), vec!["1", "2"]);

    drop(held);
    let report = partition.garbage_collect().unwrap();
    assert_eq!(report.removed_versions, vec![1]);
    assert!(report.removed_segments.contains(&SegmentId::built(0)));
    assert!(!layout.segment_path(SegmentId::built(0)).exists());
    assert!(!layout.segment_path(SegmentId::built(1)).exists());
    assert_eq!(partition.stats().oldest_referenced_version_id, 2);
}

#[test]
fn released_snapshots_are_not_retained() {
    let fx = Fixture::new(basic_schema());
    let partition = fx.open();

    partition.build(&doc("a", 1, "hello")).unwrap();
    let first = Arc::downgrade(&partition.get_reader().unwrap());
    for ts in 2..200 {
        partition.build(&doc(&format!("k{}", ts), ts, "hello")).unwrap();
    }

    assert!(first.upgrade().is_none());
    assert_eq!(partition.stats().live_reader_count, 1);

    let held = partition.get_reader().unwrap();
    partition.build(&doc("b", 300, "hello")).unwrap();
    assert_eq!(partition.stats().live_reader_count, 2);
    drop(held);
    assert_eq!(partition.stats().live_reader_count, 1);
}

#[test]
fn reopen_without_new_version_is_a_no_op() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let partition = fx.open();
    let before = partition.get_reader().unwrap();

    assert_eq!(partition.reopen(ReopenTarget::Latest, false).unwrap(), ReopenOutcome::NoChange);
    assert_eq!(partition.reopen(ReopenTarget::Latest, false).unwrap(), ReopenOutcome::NoChange);
    let after = partition.get_reader().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.version_id(), 0);
}

#[test]
fn explicit_reopen_picks_up_newest_version() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let partition = fx.open();
    fx.commit(vec![doc("2", 2, "hello")], 2);

    let outcome = partition.reopen(ReopenTarget::Latest, false).unwrap();
    assert_eq!(outcome, ReopenOutcome::Adopted { version_id: 1 });
    assert_eq!(partition.version().version_id, 1);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "2"]);
}

#[test]
fn older_or_foreign_versions_are_rejected() {
    let mut fx = Fixture::new(basic_schema());
    let v0 = fx.commit(vec![doc("1", 1, "hello")], 1);
    let v1 = fx.commit(vec![doc("2", 2, "hello")], 2);
    let partition = fx.open();
    assert_eq!(partition.version().version_id, 1);
    let before = partition.get_reader().unwrap();

    assert!(matches!(partition.incremental_arrived(v0).unwrap(), ReopenOutcome::Rejected(_)));
    assert!(matches!(
        partition.reopen(ReopenTarget::Version(0), false).unwrap(),
        ReopenOutcome::Rejected(_)
    ));

    let mut foreign = v1.clone();
    foreign.version_id = 7;
    foreign.schema_version_id = 9;
    assert!(matches!(partition.incremental_arrived(foreign).unwrap(), ReopenOutcome::Rejected(_)));

    assert!(Arc::ptr_eq(&before, &partition.get_reader().unwrap()));
    assert!(partition.status().is_healthy());
}

#[test]
fn missing_segment_fails_reopen_and_keeps_previous_snapshot() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let partition = fx.open();
    let before = partition.get_reader().unwrap();

    let v1 = fx.commit(vec![doc("2", 2, "hello")], 2);
    std::fs::remove_dir_all(partition.layout().segment_path(SegmentId::built(1))).unwrap();
    assert!(partition.incremental_arrived(v1).is_err());

    assert!(Arc::ptr_eq(&before, &partition.get_reader().unwrap()));
    assert_eq!(partition.version().version_id, 0);
    assert!(partition.status().is_healthy());
    assert_eq!(partition.build(&doc("3", 3, "hello")).unwrap(), BuildStatus::Applied);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "3"]);
}
