use std::fs;
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{info, warn};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::memory::quota::{QuotaControl, QuotaReservation};
use crate::partition::data_view::{PartitionDataView, ViewSegment};
use crate::partition::writer::PartitionWriter;
use crate::reader::partition_reader::PartitionReader;
use crate::reader::reader_builder::ReaderBuilder;
use crate::reader::reader_container::ReaderContainer;
use crate::storage::layout::StorageLayout;
use crate::storage::segment_reader::read_segment_dir;
use crate::storage::version::{load_latest, Version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReopenState {
    Serving { version_id: i64 },
    Reopening,
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenTarget {
    Latest,
    Version(i64),
}

#[derive(Debug, Clone)]
pub enum ReopenTrigger {
    IncrementalArrived(Version),
    RealtimeSegmentDumped,
    ExplicitReopen { target: ReopenTarget, force: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReopenOutcome {
    Adopted { version_id: i64 },
    NoChange,
    Rejected(String),
    ForceReopenRequired,
}

/// Everything a reopen touches besides the writer.
pub struct ReopenContext<'a> {
    pub config: &'a Config,
    pub layout: &'a StorageLayout,
    pub builder: &'a ReaderBuilder,
    pub container: &'a ReaderContainer,
}

/// Drives version adoption and snapshot publication for one partition.
///
/// Callers hold the writer exclusively, so reopens never overlap each other
/// or a realtime write.
pub struct ReopenController {
    state: Mutex<ReopenState>,
    reopen_quota: QuotaControl,
}

impl ReopenController {
    pub fn new(version_id: i64, max_reopen_memory: usize) -> Self {
        ReopenController {
            state: Mutex::new(ReopenState::Serving { version_id }),
            reopen_quota: QuotaControl::new("reopen", max_reopen_memory),
        }
    }

    pub fn state(&self) -> ReopenState {
        self.state.lock().clone()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(*self.state.lock(), ReopenState::Fatal(_))
    }

    fn set_state(&self, state: ReopenState) {
        *self.state.lock() = state;
    }

    pub fn handle(
        &self,
        trigger: ReopenTrigger,
        writer: &mut PartitionWriter,
        ctx: &ReopenContext<'_>,
    ) -> Result<ReopenOutcome> {
        if let ReopenState::Fatal(reason) = self.state() {
            return Err(Error::inconsistent(format!("partition is unusable: {}", reason)));
        }

        match trigger {
            ReopenTrigger::IncrementalArrived(version) => self.adopt(version, false, writer, ctx),
            ReopenTrigger::RealtimeSegmentDumped => self.refresh_realtime(writer, ctx),
            ReopenTrigger::ExplicitReopen { target, force } => {
                let version = match target {
                    ReopenTarget::Latest => match load_latest(&ctx.layout.root)? {
                        Some(version) => version,
                        None if force => writer.version().clone(),
                        None => return Ok(ReopenOutcome::NoChange),
                    },
                    ReopenTarget::Version(id) => Version::load_id(&ctx.layout.root, id)?,
                };
                self.adopt(version, force, writer, ctx)
            }
        }
    }

    fn adopt(
        &self,
        version: Version,
        force: bool,
        writer: &mut PartitionWriter,
        ctx: &ReopenContext<'_>,
    ) -> Result<ReopenOutcome> {
        let current = writer.version();
        if current.is_valid() && !force && version.version_id == current.version_id {
            return Ok(ReopenOutcome::NoChange);
        }
        if current.is_valid() && version.version_id < current.version_id {
            let reason = format!("version {} is older than served version {}", version.version_id, current.version_id);
            warn!(%reason, "rejected reopen");
            return Ok(ReopenOutcome::Rejected(reason));
        }
        if version.schema_version_id != writer.schema.schema_version_id {
            let reason = format!(
                "version {} has schema {}, partition schema is {}",
                version.version_id, version.schema_version_id, writer.schema.schema_version_id
            );
            warn!(%reason, "rejected reopen");
            return Ok(ReopenOutcome::Rejected(reason));
        }

        let estimate = estimate_new_segments(ctx.layout, &version, writer) + writer.realtime_memory_use();
        let reservation = match QuotaReservation::reserve(&self.reopen_quota, estimate) {
            Ok(reservation) => Some(reservation),
            Err(e) if !force => {
                warn!(version_id = version.version_id, estimate, error = %e, "reopen needs a forced reopen");
                return Ok(ReopenOutcome::ForceReopenRequired);
            }
            Err(_) => None,
        };

        let previous_id = writer.version().version_id;
        self.set_state(ReopenState::Reopening);
        let result = self.load_and_publish(version, force, writer, ctx);
        drop(reservation);

        match &result {
            Ok(ReopenOutcome::Adopted { version_id }) => self.set_state(ReopenState::Serving { version_id: *version_id }),
            Err(e) if self.is_fatal() => warn!(error = %e, "reopen left the partition unusable"),
            _ => self.set_state(ReopenState::Serving { version_id: previous_id }),
        }
        result
    }

    fn load_and_publish(
        &self,
        version: Version,
        force: bool,
        writer: &mut PartitionWriter,
        ctx: &ReopenContext<'_>,
    ) -> Result<ReopenOutcome> {
        let mut on_disk = Vec::with_capacity(version.segment_ids.len());
        for id in &version.segment_ids {
            let segment = match writer.loaded_segment(*id) {
                Some(loaded) => loaded.clone(),
                None => {
                    let path = ctx.layout.segment_path(*id);
                    let data = read_segment_dir(&path)?;
                    ViewSegment::on_disk(Arc::new(data), path)
                }
            };
            on_disk.push(segment);
        }

        let version_id = version.version_id;
        let prepared = writer.prepare(version, on_disk);
        let view = writer.prepared_view(&prepared)?;
        self.link_realtime(&view, ctx, force)?;

        let hint = if force { None } else { ctx.container.latest() };
        let reader = ctx.builder.build(view, &prepared.deletion_map, hint.as_deref())?;
        ctx.container.publish(reader);
        writer.commit(prepared);

        info!(version_id, forced = force, "adopted version");
        Ok(ReopenOutcome::Adopted { version_id })
    }

    /// Publishes a snapshot of the writer's current state after a building
    /// segment was sealed.
    fn refresh_realtime(&self, writer: &mut PartitionWriter, ctx: &ReopenContext<'_>) -> Result<ReopenOutcome> {
        let realtime = writer.realtime_memory_use();
        let reservation = match QuotaReservation::reserve(&self.reopen_quota, realtime) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!(realtime, error = %e, "realtime refresh needs a forced reopen");
                return Ok(ReopenOutcome::ForceReopenRequired);
            }
        };
        let reader = self.publish_current(writer, ctx)?;
        drop(reservation);
        Ok(ReopenOutcome::Adopted { version_id: reader.version_id() })
    }

    /// Builds and publishes a snapshot of the writer's current state.
    pub fn publish_current(&self, writer: &mut PartitionWriter, ctx: &ReopenContext<'_>) -> Result<Arc<PartitionReader>> {
        if let ReopenState::Fatal(reason) = self.state() {
            return Err(Error::inconsistent(format!("partition is unusable: {}", reason)));
        }
        let view = writer.view()?;
        self.link_realtime(&view, ctx, false)?;
        let hint = ctx.container.latest();
        let reader = ctx.builder.build(view, writer.deletion_map(), hint.as_deref())?;
        ctx.container.publish(reader.clone());
        Ok(reader)
    }

    /// Links realtime segments to disk when forced or above the watermark.
    /// A failure makes the partition unusable.
    fn link_realtime(&self, view: &PartitionDataView, ctx: &ReopenContext<'_>, all: bool) -> Result<()> {
        let over_watermark = ctx
            .config
            .realtime_link_watermark
            .is_some_and(|watermark| view.realtime_memory_use() > watermark);
        if !all && !over_watermark {
            return Ok(());
        }
        let Some(last) = view.realtime.last() else {
            return Ok(());
        };
        match view.switch_realtime_to_linked(ctx.layout, last.id()) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.kind() == ErrorKind::InconsistentState {
                    self.set_state(ReopenState::Fatal(e.to_string()));
                }
                Err(e)
            }
        }
    }
}

/// Bytes on disk of the segments `version` adds to what the writer holds.
fn estimate_new_segments(layout: &StorageLayout, version: &Version, writer: &PartitionWriter) -> usize {
    version
        .segment_ids
        .iter()
        .filter(|id| writer.loaded_segment(**id).is_none())
        .map(|id| dir_size(&layout.segment_path(*id)))
        .sum()
}

fn dir_size(path: &Path) -> usize {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) => meta.len() as usize,
            Err(_) => 0,
        })
        .sum()
}
