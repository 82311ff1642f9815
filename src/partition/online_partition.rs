use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::{PartitionStatus, ReaderStats};
use crate::core::types::{Document, Locator};
use crate::index::attribute_reader::AttributeReader;
use crate::index::primary_key_reader::PrimaryKeyReader;
use crate::index::registry::ReaderRegistry;
use crate::memory::quota::QuotaControl;
use crate::partition::data_view::ViewSegment;
use crate::partition::dumper::Dumper;
use crate::partition::reopen::{ReopenContext, ReopenController, ReopenOutcome, ReopenTarget, ReopenTrigger};
use crate::partition::writer::{BuildStatus, PartitionWriter};
use crate::reader::partition_reader::PartitionReader;
use crate::reader::reader_builder::ReaderBuilder;
use crate::reader::reader_container::{GcReport, ReaderContainer};
use crate::schema::schema::Schema;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::storage::segment_reader::read_segment_dir;
use crate::storage::version::{resolve_latest, Version};

/// One online partition: serves snapshots, accepts realtime documents and
/// adopts new on-disk versions.
///
/// Queries go through `get_reader` and never take the writer lock. Builds and
/// reopens are serialized on it.
pub struct OnlinePartition {
    config: Config,
    schema: Arc<Schema>,
    layout: StorageLayout,
    builder: ReaderBuilder,
    container: Arc<ReaderContainer>,
    writer: Mutex<PartitionWriter>,
    controller: ReopenController,
    realtime_quota: QuotaControl,
    status: RwLock<PartitionStatus>,
    dumper: Option<Dumper>,
    _lock: FileLock,
}

impl OnlinePartition {
    pub fn open(schema: Arc<Schema>, config: Config) -> Result<Self> {
        Self::open_with_registry(schema, config, Arc::new(ReaderRegistry::with_builtin_readers()))
    }

    /// Opens the newest version found under the configured roots, recovers
    /// linked realtime segments and publishes the first snapshot.
    pub fn open_with_registry(schema: Arc<Schema>, config: Config, registry: Arc<ReaderRegistry>) -> Result<Self> {
        config.validate()?;
        let (root, version) = resolve_latest(&config.index_roots)?;
        let layout = StorageLayout::new(root)?;
        let lock = FileLock::acquire(&layout.lock_path())?;

        let version = version.unwrap_or_else(Version::empty);
        if version.is_valid() && version.schema_version_id != schema.schema_version_id {
            return Err(Error::initialize_failed(format!(
                "version {} has schema {}, partition schema is {}",
                version.version_id, version.schema_version_id, schema.schema_version_id
            )));
        }
        let on_disk = load_segments(&layout, &version)?;

        let mut writer = PartitionWriter::recover(
            schema.clone(),
            layout.clone(),
            config.version_format,
            config.max_building_doc_count,
            version.clone(),
            on_disk,
        )?;
        let builder = ReaderBuilder::new(schema.clone(), registry, &config)?;
        let container = Arc::new(ReaderContainer::new());
        let controller = ReopenController::new(version.version_id, config.max_reopen_memory);
        let dumper = if config.async_dump { Some(Dumper::start(layout.clone())?) } else { None };

        let ctx = ReopenContext {
            config: &config,
            layout: &layout,
            builder: &builder,
            container: &container,
        };
        controller.publish_current(&mut writer, &ctx)?;
        writer.persist_realtime_marker()?;

        info!(
            root = %layout.root.display(),
            cluster = %config.cluster_name,
            version_id = version.version_id,
            realtime_segments = writer.realtime_segments().len(),
            "opened online partition"
        );

        Ok(OnlinePartition {
            realtime_quota: QuotaControl::new("realtime", config.max_realtime_memory),
            config,
            schema,
            layout,
            builder,
            container,
            writer: Mutex::new(writer),
            controller,
            status: RwLock::new(PartitionStatus::Healthy),
            dumper,
            _lock: lock,
        })
    }

    fn context(&self) -> ReopenContext<'_> {
        ReopenContext {
            config: &self.config,
            layout: &self.layout,
            builder: &self.builder,
            container: &self.container,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Version the writer currently builds on.
    pub fn version(&self) -> Version {
        self.writer.lock().version().clone()
    }

    /// Applies one realtime document.
    ///
    /// Over the realtime quota nothing is written and the partition reports
    /// `ReachMaxRealtimeSize`.
    pub fn build(&self, doc: &Document) -> Result<BuildStatus> {
        if let PartitionStatus::Fatal(reason) = self.status() {
            return Err(Error::inconsistent(format!("partition is unusable: {}", reason)));
        }

        let mut writer = self.writer.lock();
        if !self.realtime_quota.set_usage(writer.realtime_memory_use()) {
            self.set_status(PartitionStatus::ReachMaxRealtimeSize);
            return Ok(BuildStatus::QuotaExceeded);
        }
        self.clear_status(&PartitionStatus::ReachMaxRealtimeSize);

        let status = writer.apply(doc)?;
        if status != BuildStatus::Applied {
            return Ok(status);
        }

        if writer.should_seal() {
            self.seal_and_refresh(&mut writer)?;
        } else if self.config.refresh_reader_on_build {
            let reader = self
                .controller
                .publish_current(&mut writer, &self.context())
                .map_err(|e| self.fail(e))?;
            self.settle(Ok(ReopenOutcome::Adopted { version_id: reader.version_id() }), &mut writer)?;
        }
        Ok(status)
    }

    /// Seals the building segment and publishes a snapshot with it.
    pub fn dump_building_segment(&self) -> Result<ReopenOutcome> {
        let mut writer = self.writer.lock();
        self.seal_and_refresh(&mut writer)
    }

    fn seal_and_refresh(&self, writer: &mut PartitionWriter) -> Result<ReopenOutcome> {
        if let Some(sealed) = writer.seal_building()? {
            self.submit_dump(sealed);
        }
        let result = self
            .controller
            .handle(ReopenTrigger::RealtimeSegmentDumped, writer, &self.context());
        self.settle(result, writer)
    }

    fn submit_dump(&self, sealed: ViewSegment) {
        if let Some(dumper) = &self.dumper {
            let id = sealed.id();
            if let Err(e) = dumper.submit(sealed) {
                warn!(segment = %id, error = %e, "could not queue realtime dump, segment stays in memory");
            }
        }
    }

    /// Publishes a snapshot of the current realtime state.
    pub fn refresh(&self) -> Result<Arc<PartitionReader>> {
        let mut writer = self.writer.lock();
        let reader = self
            .controller
            .publish_current(&mut writer, &self.context())
            .map_err(|e| self.fail(e))?;
        self.settle(Ok(ReopenOutcome::Adopted { version_id: reader.version_id() }), &mut writer)?;
        Ok(reader)
    }

    /// Adopts `target`, or reports why it was not adopted.
    ///
    /// With `force` the reopen quota is ignored, realtime segments are
    /// linked to disk first and the snapshot is built from scratch.
    pub fn reopen(&self, target: ReopenTarget, force: bool) -> Result<ReopenOutcome> {
        self.handle_version(ReopenTrigger::ExplicitReopen { target, force })
    }

    /// Adopts an incremental version produced by the offline builder.
    pub fn incremental_arrived(&self, version: Version) -> Result<ReopenOutcome> {
        self.handle_version(ReopenTrigger::IncrementalArrived(version))
    }

    fn handle_version(&self, trigger: ReopenTrigger) -> Result<ReopenOutcome> {
        let mut writer = self.writer.lock();
        let result = self.controller.handle(trigger, &mut writer, &self.context());
        let outcome = self.settle(result, &mut writer)?;
        match &outcome {
            ReopenOutcome::Adopted { .. } if self.config.auto_garbage_collect => {
                if let Err(e) = self.collect(&writer) {
                    warn!(error = %e, "garbage collection after reopen failed");
                }
            }
            ReopenOutcome::Rejected(reason) => info!(%reason, "reopen rejected, keeping current version"),
            _ => {}
        }
        Ok(outcome)
    }

    /// Turns a reopen result into partition status.
    fn settle(&self, result: Result<ReopenOutcome>, writer: &mut PartitionWriter) -> Result<ReopenOutcome> {
        match result {
            Ok(ReopenOutcome::Adopted { version_id }) => {
                writer.persist_realtime_marker()?;
                self.clear_status(&PartitionStatus::ForceReopenRequired);
                if self.realtime_quota.set_usage(writer.realtime_memory_use()) {
                    self.clear_status(&PartitionStatus::ReachMaxRealtimeSize);
                }
                Ok(ReopenOutcome::Adopted { version_id })
            }
            Ok(ReopenOutcome::ForceReopenRequired) => {
                self.set_status(PartitionStatus::ForceReopenRequired);
                Ok(ReopenOutcome::ForceReopenRequired)
            }
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Records a failure that left the controller unusable.
    fn fail(&self, e: Error) -> Error {
        if self.controller.is_fatal() {
            self.set_status(PartitionStatus::Fatal(e.to_string()));
        }
        e
    }

    pub fn get_reader(&self) -> Result<Arc<PartitionReader>> {
        self.container
            .latest()
            .ok_or_else(|| Error::internal("no snapshot published"))
    }

    pub fn get_primary_key_reader(&self) -> Result<Arc<PrimaryKeyReader>> {
        Ok(self.get_reader()?.primary_key_reader.clone())
    }

    pub fn get_attribute_reader(&self, field: &str) -> Option<Arc<AttributeReader>> {
        self.container.latest()?.get_attribute_reader(field)
    }

    /// Where realtime consumption should resume.
    pub fn get_locator(&self) -> Result<Locator> {
        self.writer
            .lock()
            .seek()
            .locator
            .ok_or_else(|| Error::not_found("no locator"))
    }

    pub fn status(&self) -> PartitionStatus {
        self.status.read().clone()
    }

    fn set_status(&self, status: PartitionStatus) {
        let mut current = self.status.write();
        if current.is_fatal() || *current == status {
            return;
        }
        info!(from = ?*current, to = ?status, "partition status changed");
        *current = status;
    }

    fn clear_status(&self, status: &PartitionStatus) {
        let mut current = self.status.write();
        if *current == *status {
            info!(from = ?*current, "partition healthy again");
            *current = PartitionStatus::Healthy;
        }
    }

    pub fn stats(&self) -> ReaderStats {
        let (realtime_segment_count, realtime_memory_bytes) = {
            let writer = self.writer.lock();
            (writer.realtime_segments().len(), writer.realtime_memory_use())
        };
        ReaderStats {
            latest_version_id: self.container.latest_version_id(),
            oldest_referenced_version_id: self.container.oldest_referenced_version_id(),
            live_reader_count: self.container.live_reader_count(),
            realtime_segment_count,
            realtime_memory_bytes,
            status: self.status(),
        }
    }

    pub fn garbage_collect(&self) -> Result<GcReport> {
        let writer = self.writer.lock();
        self.collect(&writer)
    }

    fn collect(&self, writer: &PartitionWriter) -> Result<GcReport> {
        self.container
            .garbage_collect(&self.layout, self.config.keep_version_count, &writer.referenced_segments())
    }

    /// Blocks until queued dumps finish, then records the linked chain.
    pub fn wait_dump_finished(&self) -> Result<()> {
        if let Some(dumper) = &self.dumper {
            dumper.wait_dump_finished();
        }
        self.writer.lock().persist_realtime_marker()?;
        Ok(())
    }

    pub fn dump_failure_count(&self) -> u64 {
        self.dumper.as_ref().map(|d| d.failure_count()).unwrap_or(0)
    }
}

fn load_segments(layout: &StorageLayout, version: &Version) -> Result<Vec<ViewSegment>> {
    version
        .segment_ids
        .iter()
        .map(|id| {
            let path = layout.segment_path(*id);
            let data = read_segment_dir(&path)?;
            Ok(ViewSegment::on_disk(Arc::new(data), path))
        })
        .collect()
}
