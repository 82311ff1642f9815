use std::collections::HashSet;
use std::sync::Arc;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use roaring::RoaringBitmap;
use tracing::{debug, info};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::index::accessory_reader::AccessoryReader;
use crate::index::attribute_reader::{AttributeReader, AttributeReaderSet};
use crate::index::deletion_map::{DeletionMap, DeletionMapReader};
use crate::index::index_kind::IndexKind;
use crate::index::index_reader::{IndexReader, MultiFieldIndexReader, SegmentSource};
use crate::index::join_reader::{JoinDirection, JoinDocIdReader};
use crate::index::primary_key_reader::PrimaryKeyReader;
use crate::index::reader_cache::ReaderCache;
use crate::index::registry::ReaderRegistry;
use crate::index::sorted_range::SortedDocIdRangeSearcher;
use crate::index::source_reader::SourceReader;
use crate::index::summary_reader::SummaryReader;
use crate::partition::data_view::PartitionDataView;
use crate::reader::partition_reader::PartitionReader;
use crate::schema::schema::{Schema, TableType};
use crate::storage::version::Version;

const DEFAULT_PRIMARY_KEY_NAME: &str = "primary_key";

/// Builds `PartitionReader` snapshots from a data view.
///
/// A build either returns a complete snapshot or fails without side effects
/// on previously published ones. Realtime linking happens before, in the
/// partition.
pub struct ReaderBuilder {
    pub schema: Arc<Schema>,
    pub registry: Arc<ReaderRegistry>,
    pub lazy_load_attributes: bool,
    pub disable_load_customized_index: bool,
    pool: ThreadPool,
}

impl ReaderBuilder {
    pub fn new(schema: Arc<Schema>, registry: Arc<ReaderRegistry>, config: &Config) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.reader_build_threads.max(1))
            .thread_name(|i| format!("reader-build-{}", i))
            .build()
            .map_err(|e| Error::initialize_failed(format!("reader build pool: {}", e)))?;
        Ok(ReaderBuilder {
            schema,
            registry,
            lazy_load_attributes: config.lazy_load_attributes,
            disable_load_customized_index: config.disable_load_customized_index,
            pool,
        })
    }

    /// Opens a snapshot over `view`, reusing per-segment parts of `hint`.
    pub fn build(
        &self,
        view: PartitionDataView,
        deletion_map: &DeletionMap,
        hint: Option<&PartitionReader>,
    ) -> Result<Arc<PartitionReader>> {
        let segments = view.segment_sources();
        let deletions = Arc::new(deletion_map.snapshot(&view.deletion_layout()));
        let version = view.version.clone();
        let view = Arc::new(view);

        let mut reader = self.open_partition(&self.schema, &segments, deletions.clone(), hint, version.clone())?;

        if let Some(sub_schema) = &self.schema.sub_schema {
            let sub_segments = view.sub_segment_sources();
            let sub_deletions = Arc::new(sub_deletion_map(&segments, &sub_segments, &deletions));
            let sub_hint = hint.and_then(|h| h.sub_reader.as_deref());
            let sub = self.open_partition(sub_schema, &sub_segments, sub_deletions, sub_hint, version)?;
            reader.main_to_sub = Some(JoinDocIdReader::open(JoinDirection::MainToSub, &segments, &sub_segments));
            reader.sub_to_main = Some(JoinDocIdReader::open(JoinDirection::SubToMain, &segments, &sub_segments));
            reader.sub_reader = Some(Arc::new(sub));
        }
        reader.view = Some(view);

        info!(
            version_id = reader.version_id(),
            segments = reader.segments.len(),
            docs = reader.doc_count(),
            deleted = reader.deleted_doc_count(),
            reused_parts = reader.cache.reused_count(),
            built_parts = reader.cache.built_count(),
            "built partition reader"
        );
        Ok(Arc::new(reader))
    }

    fn open_partition(
        &self,
        schema: &Schema,
        segments: &[SegmentSource],
        deletions: Arc<DeletionMapReader>,
        hint: Option<&PartitionReader>,
        version: Version,
    ) -> Result<PartitionReader> {
        let live: HashSet<_> = segments.iter().map(|s| (s.id, s.doc_count())).collect();
        let cache = Arc::new(match hint {
            Some(hint) => ReaderCache::inherit(&hint.cache, &live),
            None => ReaderCache::new(),
        });

        let mut attributes = AttributeReaderSet::new();
        for attribute in &schema.attributes {
            attributes.add(AttributeReader::open(&attribute.field, segments, self.lazy_load_attributes, &cache)?);
        }
        for pack in &schema.pack_attributes {
            attributes.add_pack(pack, segments, self.lazy_load_attributes, &cache)?;
        }

        let configs: Vec<_> = schema
            .indexes
            .iter()
            .filter(|c| c.kind.is_inverted())
            .filter(|c| {
                let skip = c.kind == IndexKind::Customized && self.disable_load_customized_index;
                if skip {
                    debug!(index = %c.name, "customized index loading disabled");
                }
                !skip
            })
            .collect();
        let opened = self.pool.install(|| {
            configs
                .par_iter()
                .map(|c| Ok((c.name.clone(), self.registry.open(c, segments, &cache)?)))
                .collect::<Result<Vec<(String, Box<dyn IndexReader>)>>>()
        })?;

        let pk_name = schema
            .primary_key_index()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| DEFAULT_PRIMARY_KEY_NAME.to_string());
        let primary_key_reader = Arc::new(PrimaryKeyReader::open(&pk_name, segments, deletions.clone(), &cache)?);

        let accessory = Arc::new(AccessoryReader::open(schema, segments, &cache)?);
        let mut index_reader = MultiFieldIndexReader::new();
        for (name, mut reader) in opened {
            reader.attach_accessory(&accessory);
            index_reader.add_reader(&name, Arc::from(reader))?;
        }
        if schema.primary_key_index().is_some() {
            index_reader.add_reader(&pk_name, primary_key_reader.clone())?;
        }

        let summary_reader = SummaryReader::open(schema.summary.enabled_fields(), segments, &attributes);
        let source_reader = SourceReader::open(schema.source.enabled_groups(), segments);

        let sorted_range_searcher = (schema.table_type == TableType::Normal && !schema.sort_descriptions.is_empty())
            .then(|| SortedDocIdRangeSearcher::open(&schema.sort_descriptions, &attributes, segments));

        Ok(PartitionReader {
            index_reader,
            primary_key_reader,
            attributes,
            accessory,
            summary_reader,
            source_reader,
            sorted_range_searcher,
            sub_reader: None,
            main_to_sub: None,
            sub_to_main: None,
            deletion_map: deletions,
            cache,
            segments: segments.to_vec(),
            version,
            view: None,
        })
    }
}

/// A sub document is deleted exactly when its main document is.
fn sub_deletion_map(main: &[SegmentSource], sub: &[SegmentSource], deletions: &DeletionMapReader) -> DeletionMapReader {
    let parts = main
        .iter()
        .zip(sub.iter())
        .map(|(m, s)| {
            let mut bitmap = RoaringBitmap::new();
            if let Some(main_deleted) = deletions.segment_bitmap(m.id) {
                for local in main_deleted.iter() {
                    bitmap.insert_range(m.data.sub_doc_range(local));
                }
            }
            (s.id, s.doc_count() as u32, Arc::new(bitmap))
        })
        .collect();
    DeletionMapReader::from_parts(parts)
}
