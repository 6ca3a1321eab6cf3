use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// Atomic counter so workers can update without a lock
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self { value: AtomicU64::new(0) }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct CrawlMetrics {
    pub records_written: Counter,
    pub sentinels_written: Counter,
    pub pages_skipped: Counter,
    pub rows_skipped: Counter,
    pub retries: Counter,
    pub failed_shards: Counter,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_written: self.records_written.get(),
            shards_completed: self.sentinels_written.get(),
            pages_skipped: self.pages_skipped.get(),
            rows_skipped: self.rows_skipped.get(),
            retries: self.retries.get(),
            failed_shards: self.failed_shards.get(),
        }
    }
}

/// Point-in-time copy of the counters, for end-of-run reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_written: u64,
    pub shards_completed: u64,
    pub pages_skipped: u64,
    pub rows_skipped: u64,
    pub retries: u64,
    pub failed_shards: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} records, {} shards complete, {} failed, {} retries, {} pages resumed past",
            self.records_written, self.shards_completed, self.failed_shards, self.retries, self.pages_skipped
        )
    }
}
