use std::collections::HashMap;
use std::sync::Arc;
use crate::core::error::{Error, Result};
use crate::index::index_kind::IndexKind;
use crate::index::index_reader::{IndexReader, SegmentSource};
use crate::index::range_index_reader::RangeIndexReader;
use crate::index::reader_cache::ReaderCache;
use crate::index::term_index_reader::TermIndexReader;
use crate::schema::schema::IndexConfig;

pub type ReaderConstructor = fn(&IndexConfig, &[SegmentSource], &ReaderCache) -> Result<Box<dyn IndexReader>>;

/// Opens readers for a customized index kind registered by name.
pub trait CustomizedIndexFactory: Send + Sync {
    fn create(&self, config: &IndexConfig, segments: &[SegmentSource]) -> Result<Box<dyn IndexReader>>;
}

/// Index kind to reader constructor table, built once at startup and passed
/// to every snapshot build.
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    constructors: HashMap<IndexKind, ReaderConstructor>,
    factories: HashMap<String, Arc<dyn CustomizedIndexFactory>>,
}

fn open_term_reader(config: &IndexConfig, segments: &[SegmentSource], cache: &ReaderCache) -> Result<Box<dyn IndexReader>> {
    Ok(Box::new(TermIndexReader::open(config, segments, cache)?))
}

fn open_range_reader(config: &IndexConfig, segments: &[SegmentSource], cache: &ReaderCache) -> Result<Box<dyn IndexReader>> {
    Ok(Box::new(RangeIndexReader::open(config, segments, cache)?))
}

impl ReaderRegistry {
    pub fn new() -> Self {
        ReaderRegistry::default()
    }

    /// Registry with every built-in inverted index kind.
    ///
    /// The primary key reader is opened by the snapshot builder itself since
    /// it needs the snapshot's deletion map.
    pub fn with_builtin_readers() -> Self {
        let mut registry = ReaderRegistry::new();
        registry.register(IndexKind::Normal, open_term_reader);
        registry.register(IndexKind::Trie, open_term_reader);
        registry.register(IndexKind::Spatial, open_term_reader);
        registry.register(IndexKind::Range, open_range_reader);
        registry.register(IndexKind::Date, open_range_reader);
        registry
    }

    pub fn register(&mut self, kind: IndexKind, constructor: ReaderConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn register_customized(&mut self, name: &str, factory: Arc<dyn CustomizedIndexFactory>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn open(&self, config: &IndexConfig, segments: &[SegmentSource], cache: &ReaderCache) -> Result<Box<dyn IndexReader>> {
        if config.kind == IndexKind::Customized {
            let name = config.customized_factory.as_deref().unwrap_or_default();
            let factory = self.factories.get(name).ok_or_else(|| {
                Error::initialize_failed(format!("no factory {} for customized index {}", name, config.name))
            })?;
            return factory.create(config, segments).map_err(|e| {
                Error::initialize_failed(format!("customized index {}: {}", config.name, e))
            });
        }

        let constructor = self.constructors.get(&config.kind).ok_or_else(|| {
            Error::initialize_failed(format!("no reader registered for {} index {}", config.kind.name(), config.name))
        })?;
        constructor(config, segments, cache)
    }

    pub fn supports(&self, kind: IndexKind) -> bool {
        kind == IndexKind::Customized || self.constructors.contains_key(&kind)
    }
}
