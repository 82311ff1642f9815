use std::sync::atomic::{AtomicUsize, Ordering};
use crate::core::error::{Error, Result};

/// Memory quota for one concern (realtime build, reopen).
///
/// `allocate` is all-or-nothing: a refused request leaves usage unchanged.
#[derive(Debug)]
pub struct QuotaControl {
    pub name: &'static str,
    pub usage: AtomicUsize,
    pub limit: usize,
}

impl QuotaControl {
    pub fn new(name: &'static str, limit: usize) -> Self {
        QuotaControl {
            name,
            usage: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn allocate(&self, size: usize) -> Result<()> {
        let new_usage = self.usage.fetch_add(size, Ordering::SeqCst) + size;
        if new_usage > self.limit {
            self.usage.fetch_sub(size, Ordering::SeqCst);
            return Err(Error::quota_exceeded(format!(
                "{} quota exceeded: {} + {} > {}",
                self.name,
                new_usage - size,
                size,
                self.limit
            )));
        }
        Ok(())
    }

    pub fn release(&self, size: usize) {
        let _ = self
            .usage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |u| Some(u.saturating_sub(size)));
    }

    /// Replaces the tracked usage with a measured value. Returns whether it
    /// fits the limit.
    pub fn set_usage(&self, usage: usize) -> bool {
        self.usage.store(usage, Ordering::SeqCst);
        usage <= self.limit
    }

    pub fn current_usage(&self) -> usize {
        self.usage.load(Ordering::Acquire)
    }

    pub fn is_exceeded(&self) -> bool {
        self.current_usage() > self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.current_usage())
    }
}

/// Reopen quota held for the duration of one snapshot build.
pub struct QuotaReservation<'a> {
    quota: &'a QuotaControl,
    size: usize,
}

impl<'a> QuotaReservation<'a> {
    pub fn reserve(quota: &'a QuotaControl, size: usize) -> Result<Self> {
        quota.allocate(size)?;
        Ok(QuotaReservation { quota, size })
    }
}

impl Drop for QuotaReservation<'_> {
    fn drop(&mut self) {
        self.quota.release(self.size);
    }
}
