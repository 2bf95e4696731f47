//! Per-pipeline counters and stats snapshots

use crate::line::DataKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one data kind, shared between the enqueue path and the dispatcher
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    valid: AtomicU64,
    invalid: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
    throttled: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_valid(&self) {
        self.valid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, lines: usize) {
        self.dropped.fetch_add(lines as u64, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, lines: usize) {
        self.delivered.fetch_add(lines as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn throttled(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Combine the counters with the buffer gauges
    pub fn snapshot(&self, kind: DataKind, queue_size: usize, capacity: usize) -> PipelineStats {
        PipelineStats {
            kind,
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            dropped: self.dropped(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failures: self.failures(),
            throttled: self.throttled(),
            queue_size,
            remaining_capacity: capacity.saturating_sub(queue_size),
        }
    }
}

/// Point-in-time view of one pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub kind: DataKind,
    pub valid: u64,
    pub invalid: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failures: u64,
    pub throttled: u64,
    pub queue_size: usize,
    pub remaining_capacity: usize,
}

/// Point-in-time view of a whole sender
#[derive(Debug, Clone, Serialize)]
pub struct SenderStats {
    pub sender_id: String,
    pub pipelines: Vec<PipelineStats>,
    pub transport_failures: u64,
}

impl SenderStats {
    pub fn total_dropped(&self) -> u64 {
        self.pipelines.iter().map(|p| p.dropped).sum()
    }

    pub fn total_queued(&self) -> usize {
        self.pipelines.iter().map(|p| p.queue_size).sum()
    }
}
