//! Bounded in-memory buffering for pre-rendered lines

use crate::line::Line;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Fixed-capacity FIFO of lines for one data kind.
///
/// `try_enqueue` never waits on I/O or on a drain in progress: the lock is
/// only held for the push itself. When full, the incoming line is rejected.
#[derive(Debug)]
pub struct LineBuffer {
    lines: Mutex<VecDeque<Line>>,
    capacity: usize,
    rejected: AtomicU64,
}

impl LineBuffer {
    /// Create a new buffer. Storage grows on demand up to `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            rejected: AtomicU64::new(0),
        }
    }

    /// Add a line, handing it back if the buffer is full
    pub fn try_enqueue(&self, line: Line) -> Result<(), Line> {
        let mut lines = self.lines.lock();

        if lines.len() >= self.capacity {
            drop(lines);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(line);
        }

        lines.push_back(line);
        Ok(())
    }

    /// Put a failed batch back, keeping as many lines as still fit.
    ///
    /// Returns the number of lines that did not fit and were dropped.
    pub fn requeue(&self, batch: Vec<Line>) -> usize {
        let mut lines = self.lines.lock();
        let room = self.capacity.saturating_sub(lines.len());
        let total = batch.len();
        let kept = total.min(room);

        lines.extend(batch.into_iter().take(kept));
        let dropped = total - kept;
        drop(lines);

        if dropped > 0 {
            self.rejected.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        debug!("Requeued {} lines, dropped {}", kept, dropped);

        dropped
    }

    /// Remove and return up to `n` lines in insertion order
    pub fn drain_up_to(&self, n: usize) -> Vec<Line> {
        let mut lines = self.lines.lock();
        let count = std::cmp::min(n, lines.len());
        lines.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Lines turned away, at enqueue or requeue
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}
