use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use crate::core::error::{Error, Result};
use crate::partition::data_view::{link_segment, ViewSegment};
use crate::storage::layout::StorageLayout;

struct DumpTask {
    segment: ViewSegment,
}

#[derive(Default)]
struct DumpProgress {
    pending: Mutex<usize>,
    finished: Condvar,
    failures: AtomicU64,
}

/// Background thread persisting sealed realtime segments.
///
/// A failed dump is logged and abandoned; the segment stays in memory and is
/// still served.
pub struct Dumper {
    sender: Option<Sender<DumpTask>>,
    worker: Option<JoinHandle<()>>,
    progress: Arc<DumpProgress>,
}

impl Dumper {
    pub fn start(layout: StorageLayout) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let progress = Arc::new(DumpProgress::default());
        let worker_progress = progress.clone();
        let worker = thread::Builder::new()
            .name("partition-dump".to_string())
            .spawn(move || run(layout, receiver, worker_progress))
            .map_err(|e| Error::initialize_failed(format!("dump thread: {}", e)))?;

        Ok(Dumper {
            sender: Some(sender),
            worker: Some(worker),
            progress,
        })
    }

    pub fn submit(&self, segment: ViewSegment) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::internal("dump thread stopped"))?;
        *self.progress.pending.lock() += 1;
        if sender.send(DumpTask { segment }).is_err() {
            self.finish_one();
            return Err(Error::internal("dump thread stopped"));
        }
        Ok(())
    }

    fn finish_one(&self) {
        let mut pending = self.progress.pending.lock();
        *pending = pending.saturating_sub(1);
        self.progress.finished.notify_all();
    }

    /// Blocks until every submitted segment is dumped or abandoned.
    pub fn wait_dump_finished(&self) {
        let mut pending = self.progress.pending.lock();
        while *pending > 0 {
            self.progress.finished.wait(&mut pending);
        }
    }

    pub fn pending(&self) -> usize {
        *self.progress.pending.lock()
    }

    pub fn failure_count(&self) -> u64 {
        self.progress.failures.load(Ordering::Relaxed)
    }
}

fn run(layout: StorageLayout, receiver: Receiver<DumpTask>, progress: Arc<DumpProgress>) {
    for task in receiver.iter() {
        let id = task.segment.id();
        match link_segment(&layout, &task.segment) {
            Ok(true) => debug!(segment = %id, "dumped realtime segment"),
            Ok(false) => debug!(segment = %id, "realtime segment already on disk"),
            Err(e) => {
                progress.failures.fetch_add(1, Ordering::Relaxed);
                warn!(segment = %id, error = %e, "realtime dump failed, segment stays in memory");
            }
        }
        let mut pending = progress.pending.lock();
        *pending = pending.saturating_sub(1);
        progress.finished.notify_all();
    }
}

impl Drop for Dumper {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("dump thread panicked");
            }
        }
    }
}
