//! Lock-free counters for the poll loop and the metadata monitor

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`FeedMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMetricsSnapshot {
    /// Range-task page reads attempted
    pub polls: u64,
    /// Page reads that returned no items
    pub empty_polls: u64,
    /// Data records emitted
    pub records: u64,
    /// Metadata cycles served
    pub metadata_cycles: u64,
    /// Gone ranges resolved as merges
    pub merges: u64,
    /// Gone ranges resolved as splits
    pub splits: u64,
    /// Poll or monitor errors
    pub errors: u64,
    /// Monitor ticks completed
    pub monitor_ticks: u64,
    /// Reconfiguration requests issued
    pub reconfigurations: u64,
}

impl FeedMetricsSnapshot {
    #[inline]
    pub fn empty_poll_rate(&self) -> f64 {
        if self.polls == 0 {
            return 0.0;
        }
        self.empty_polls as f64 / self.polls as f64
    }

    #[inline]
    pub fn avg_records_per_poll(&self) -> f64 {
        let non_empty = self.polls.saturating_sub(self.empty_polls);
        if non_empty == 0 {
            return 0.0;
        }
        self.records as f64 / non_empty as f64
    }
}

/// Counters shared between a task instance and whoever reports on it
#[derive(Debug, Default)]
pub struct FeedMetrics {
    polls: AtomicU64,
    empty_polls: AtomicU64,
    records: AtomicU64,
    metadata_cycles: AtomicU64,
    merges: AtomicU64,
    splits: AtomicU64,
    errors: AtomicU64,
    monitor_ticks: AtomicU64,
    reconfigurations: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_poll(&self, records: u64) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if records == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.records.fetch_add(records, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_metadata_cycle(&self) {
        self.metadata_cycles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_merge(&self) {
        self.merges.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_split(&self) {
        self.splits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_monitor_tick(&self) {
        self.monitor_ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconfiguration(&self) {
        self.reconfigurations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedMetricsSnapshot {
        FeedMetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            metadata_cycles: self.metadata_cycles.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            splits: self.splits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            monitor_ticks: self.monitor_ticks.load(Ordering::Relaxed),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
        }
    }
}
