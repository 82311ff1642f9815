//! Shared fixtures for the partition integration suites.
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};
use online_partition::core::config::Config;
use online_partition::core::types::{DocId, Document, FieldValue};
use online_partition::index::index_kind::IndexKind;
use online_partition::partition::online_partition::OnlinePartition;
use online_partition::reader::partition_reader::PartitionReader;
use online_partition::schema::schema::{FieldType, Schema};
use online_partition::storage::offline_builder::OfflineIndexBuilder;
use online_partition::storage::version::Version;
use tempfile::TempDir;

static INIT_TRACING: Once = Once::new();

/// Installs a test subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `id` is the key field, `title` is tokenized into `index1`, `price` is an
/// attribute with a range index.
pub fn basic_schema() -> Schema {
    Schema::new()
        .add_field("id", FieldType::Text)
        .add_field("title", FieldType::Text)
        .add_field("price", FieldType::Integer)
        .add_index("pk", IndexKind::PrimaryKey, "id")
        .add_index("index1", IndexKind::Normal, "title")
        .add_index("price_range", IndexKind::Range, "price")
        .add_attribute("price")
}

pub fn doc(pk: &str, ts: i64, title: &str) -> Document {
    Document::add(pk, ts)
        .with_text("id", pk)
        .with_text("title", title)
        .with_field("price", FieldValue::Integer(ts))
}

pub fn config(root: &Path) -> Config {
    Config {
        reader_build_threads: 2,
        ..Config::with_root(root)
    }
}

/// Temp root with an offline builder writing into it.
pub struct Fixture {
    pub dir: TempDir,
    pub schema: Arc<Schema>,
    pub offline: OfflineIndexBuilder,
}

impl Fixture {
    pub fn new(schema: Schema) -> Self {
        Self::with_format(schema, 2)
    }

    pub fn with_format(schema: Schema, format_version: u32) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let schema = Arc::new(schema);
        let offline = OfflineIndexBuilder::open(dir.path(), schema.clone())
            .unwrap()
            .with_format_version(format_version);
        Fixture { dir, schema, offline }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> Config {
        config(self.dir.path())
    }

    /// Commits `docs` as one offline segment at `timestamp`.
    pub fn commit(&mut self, docs: Vec<Document>, timestamp: i64) -> Version {
        for doc in docs {
            self.offline.add(doc);
        }
        self.offline.commit(timestamp).unwrap()
    }

    pub fn open(&self) -> OnlinePartition {
        OnlinePartition::open(self.schema.clone(), self.config()).unwrap()
    }

    pub fn open_with(&self, config: Config) -> OnlinePartition {
        OnlinePartition::open(self.schema.clone(), config).unwrap()
    }
}

/// Primary keys of every visible document matching `word` in `index1`.
pub fn search_keys(reader: &PartitionReader, word: &str) -> Vec<String> {
    let docs = reader
        .search("index1", &online_partition::index::index_reader::Term::word(word))
        .unwrap();
    let mut keys: Vec<String> = docs.into_iter().filter_map(|d| primary_key_of(reader, d)).collect();
    keys.sort();
    keys
}

pub fn primary_key_of(reader: &PartitionReader, doc: DocId) -> Option<String> {
    reader.get_document(doc)?.get("id").and_then(|v| v.as_text().map(str::to_string))
}

pub fn title_of(reader: &PartitionReader, pk: &str) -> Option<String> {
    reader
        .get_document_by_key(pk)?
        .get("title")
        .and_then(|v| v.as_text().map(str::to_string))
}

/// Primary keys of every visible document, with repetitions.
pub fn visible_keys(reader: &PartitionReader) -> Vec<String> {
    let mut keys = Vec::new();
    for segment in &reader.segments {
        for (local, stored) in segment.data.documents.iter().enumerate() {
            if !reader.is_deleted(segment.global(local as u32)) {
                keys.push(stored.primary_key.clone());
            }
        }
    }
    keys.sort();
    keys
}
