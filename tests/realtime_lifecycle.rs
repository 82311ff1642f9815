mod common;

use std::collections::BTreeMap;
use std::fs;
use common::*;
use online_partition::core::stats::PartitionStatus;
use online_partition::core::types::{Document, FieldValue, Locator};
use online_partition::partition::reopen::{ReopenOutcome, ReopenTarget};
use online_partition::partition::writer::BuildStatus;
use online_partition::reader::partition_reader::PartitionReader;
use online_partition::storage::segment::SegmentId;

#[test]
fn update_merges_into_visible_document() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("a", 1, "hello one")], 1);
    let partition = fx.open();

    let update = Document::update("a", 2).with_field("price", FieldValue::Integer(9));
    assert_eq!(partition.build(&update).unwrap(), BuildStatus::Applied);
    assert_eq!(partition.build(&Document::update("missing", 3)).unwrap(), BuildStatus::Ignored);

    let reader = partition.get_reader().unwrap();
    let stored = reader.get_document_by_key("a").unwrap();
    assert_eq!(stored.get("title"), Some(&FieldValue::Text("hello one".into())));
    assert_eq!(stored.get("price"), Some(&FieldValue::Integer(9)));
    assert_eq!(search_keys(&reader, "hello"), vec!["a"]);
    assert_eq!(visible_keys(&reader), vec!["a"]);
}

#[test]
fn document_without_key_is_refused() {
    let fx = Fixture::new(basic_schema());
    let partition = fx.open();
    assert!(partition.build(&Document::add("", 1)).is_err());
    assert!(partition.status().is_healthy());
}

#[test]
fn realtime_delete_hides_realtime_add() {
    let fx = Fixture::new(basic_schema());
    let partition = fx.open();
    partition.build(&doc("a", 1, "hello")).unwrap();
    partition.build(&Document::delete("a", 2)).unwrap();

    let reader = partition.get_reader().unwrap();
    assert!(reader.lookup_primary_key("a").is_none());
    assert!(search_keys(&reader, "hello").is_empty());
    assert_eq!(reader.deleted_doc_count(), 1);
}

#[test]
fn linked_realtime_segments_survive_restart() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    config.realtime_link_watermark = Some(0);

    {
        let partition = fx.open_with(config.clone());
        partition.build(&doc("a", 5, "hello")).unwrap();
        partition.build(&doc("b", 6, "hello")).unwrap();
        let layout = partition.layout();
        assert!(layout.realtime_segment_path(SegmentId::realtime(0)).exists());
        assert!(layout.realtime_segment_path(SegmentId::realtime(1)).exists());
    }

    let partition = fx.open_with(config);
    let reader = partition.get_reader().unwrap();
    assert_eq!(search_keys(&reader, "hello"), vec!["1", "a", "b"]);
    assert_eq!(partition.stats().realtime_segment_count, 2);
    assert_eq!(partition.get_locator().unwrap(), Locator::new(0, 6));

    partition.build(&doc("c", 7, "hello")).unwrap();
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "a", "b", "c"]);
}

#[test]
fn covered_realtime_segment_removed_after_restart_and_reopen() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    config.realtime_link_watermark = Some(0);

    {
        let partition = fx.open_with(config.clone());
        partition.build(&doc("a", 5, "realtime")).unwrap();
        partition.build(&doc("b", 6, "realtime")).unwrap();
    }

    let partition = fx.open_with(config);
    let version = fx.commit(vec![doc("a", 7, "incremental")], 7);
    partition.incremental_arrived(version).unwrap();

    let reader = partition.get_reader().unwrap();
    assert_eq!(visible_keys(&reader), vec!["1", "a", "b"]);
    assert_eq!(title_of(&reader, "a").as_deref(), Some("incremental"));
    assert_eq!(title_of(&reader, "b").as_deref(), Some("realtime"));

    let layout = partition.layout();
    assert!(!layout.realtime_segment_path(SegmentId::realtime(0)).exists());
    assert!(layout.realtime_segment_path(SegmentId::realtime(1)).exists());
    let markers: Vec<_> = fs::read_dir(&layout.realtime_root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("version."))
        .collect();
    assert_eq!(markers.len(), 1);
}

#[test]
fn async_dump_links_sealed_segments() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    config.async_dump = true;

    {
        let partition = fx.open_with(config.clone());
        for (i, pk) in ["a", "b", "c"].into_iter().enumerate() {
            partition.build(&doc(pk, 10 + i as i64, "hello")).unwrap();
        }
        partition.wait_dump_finished().unwrap();

        assert_eq!(partition.dump_failure_count(), 0);
        assert_eq!(partition.stats().realtime_memory_bytes, 0);
        for seq in 0..3 {
            assert!(partition.layout().realtime_segment_path(SegmentId::realtime(seq)).exists());
        }
        assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "a", "b", "c"]);
    }

    let partition = fx.open_with(config);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "a", "b", "c"]);
}

fn assert_state(reader: &PartitionReader, expected: &BTreeMap<String, String>) {
    let keys: Vec<String> = expected.keys().cloned().collect();
    assert_eq!(visible_keys(reader), keys);
    for (key, title) in expected {
        assert_eq!(title_of(reader, key).as_ref(), Some(title), "key {}", key);
    }
}

#[test]
fn incremental_adopted_while_dumps_are_queued() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("k0", 1, "hello base")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    config.async_dump = true;

    let mut expected = BTreeMap::from([("k0".to_string(), "hello base".to_string())]);
    let mut ts = 1;
    {
        let partition = fx.open_with(config.clone());
        for round in 0..12 {
            ts += 1;
            let key = format!("k{}", round % 4);
            let title = format!("hello rt{}", ts);
            partition.build(&doc(&key, ts, &title)).unwrap();
            expected.insert(key, title);

            ts += 1;
            let gone = format!("k{}", (round + 2) % 4);
            partition.build(&Document::delete(&gone, ts)).unwrap();
            expected.remove(&gone);

            if round % 3 == 2 {
                ts += 1;
                let title = format!("hello inc{}", ts);
                let version = fx.commit(vec![doc(&gone, ts, &title)], ts);
                partition.incremental_arrived(version).unwrap();
                expected.insert(gone, title);
            }
            assert_state(&partition.get_reader().unwrap(), &expected);
        }

        // Seals the building segment holding the last delete.
        ts += 1;
        partition.build(&doc("k9", ts, "hello tail")).unwrap();
        expected.insert("k9".to_string(), "hello tail".to_string());
        partition.wait_dump_finished().unwrap();
        assert_eq!(partition.dump_failure_count(), 0);
        assert_state(&partition.get_reader().unwrap(), &expected);
    }

    let partition = fx.open_with(config);
    assert_state(&partition.get_reader().unwrap(), &expected);
    assert_eq!(partition.get_locator().unwrap(), Locator::new(0, ts));
}

#[test]
fn failed_dump_holds_restart_point_before_the_lost_segment() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    config.async_dump = true;

    {
        let partition = fx.open_with(config.clone());
        let blocked = partition.layout().realtime_segment_path(SegmentId::realtime(0));
        fs::write(&blocked, b"not a segment").unwrap();

        partition.build(&doc("a", 2, "hello")).unwrap();
        partition.build(&doc("b", 3, "hello")).unwrap();
        partition.wait_dump_finished().unwrap();

        assert_eq!(partition.dump_failure_count(), 1);
        assert!(partition.layout().realtime_segment_path(SegmentId::realtime(1)).is_dir());
        assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "a", "b"]);
        fs::remove_file(&blocked).unwrap();
    }

    // Neither realtime write is recovered, and consumption restarts before both.
    let partition = fx.open_with(config);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1"]);
    assert_eq!(partition.get_locator().unwrap(), Locator::new(0, 1));
}

#[test]
fn realtime_quota_blocks_writes_until_memory_is_released() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_realtime_memory = 1;
    let partition = fx.open_with(config);

    assert_eq!(partition.build(&doc("a", 2, "hello")).unwrap(), BuildStatus::Applied);
    assert_eq!(partition.build(&doc("b", 3, "hello")).unwrap(), BuildStatus::QuotaExceeded);
    assert_eq!(partition.status(), PartitionStatus::ReachMaxRealtimeSize);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "a"]);

    partition.dump_building_segment().unwrap();
    assert_eq!(partition.status(), PartitionStatus::ReachMaxRealtimeSize);

    let outcome = partition.reopen(ReopenTarget::Latest, true).unwrap();
    assert_eq!(outcome, ReopenOutcome::Adopted { version_id: 0 });
    assert_eq!(partition.status(), PartitionStatus::Healthy);
    assert_eq!(partition.build(&doc("b", 3, "hello")).unwrap(), BuildStatus::Applied);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "a", "b"]);
}

#[test]
fn reopen_quota_requires_forced_reopen() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_reopen_memory = 1;
    let partition = fx.open_with(config);

    partition.build(&doc("a", 2, "hello")).unwrap();
    assert_eq!(partition.dump_building_segment().unwrap(), ReopenOutcome::ForceReopenRequired);
    assert_eq!(partition.status(), PartitionStatus::ForceReopenRequired);

    let version = fx.commit(vec![doc("2", 3, "hello")], 3);
    assert_eq!(partition.incremental_arrived(version).unwrap(), ReopenOutcome::ForceReopenRequired);
    let reader = partition.get_reader().unwrap();
    assert_eq!(reader.version_id(), 0);
    assert_eq!(search_keys(&reader, "hello"), vec!["1", "a"]);

    let outcome = partition.reopen(ReopenTarget::Version(1), true).unwrap();
    assert_eq!(outcome, ReopenOutcome::Adopted { version_id: 1 });
    assert_eq!(partition.status(), PartitionStatus::Healthy);
    assert_eq!(search_keys(&partition.get_reader().unwrap(), "hello"), vec!["1", "2", "a"]);
}

#[test]
fn failed_link_makes_partition_fatal() {
    let mut fx = Fixture::new(basic_schema());
    fx.commit(vec![doc("1", 1, "hello")], 1);
    let mut config = fx.config();
    config.max_building_doc_count = 1;
    config.realtime_link_watermark = Some(0);
    let partition = fx.open_with(config);
    let before = partition.get_reader().unwrap();

    let realtime_root = partition.layout().realtime_root.clone();
    fs::remove_dir_all(&realtime_root).unwrap();
    fs::write(&realtime_root, b"not a directory").unwrap();

    assert!(partition.build(&doc("a", 2, "hello")).is_err());
    assert!(partition.status().is_fatal());
    assert!(partition.build(&doc("b", 3, "hello")).is_err());
    assert!(partition.reopen(ReopenTarget::Latest, true).is_err());

    let reader = partition.get_reader().unwrap();
    assert_eq!(reader.version_id(), before.version_id());
    assert_eq!(search_keys(&reader, "hello"), vec!["1"]);
}
