use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Request counters shared by every gateway handler.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub success: u64,
    pub errors: u64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn connections(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Counts a relay as in flight until the guard is dropped.
    pub fn track_connection(&self) -> ConnectionGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard { stats: self }
    }
}

pub struct ConnectionGuard<'a> {
    stats: &'a RequestStats,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
