//! One data kind's buffer, dispatcher and flush schedule

use crate::dispatcher::LineHandler;
use crate::errors::Result;
use crate::line::{DataKind, Line};
use crate::metrics::{PipelineMetrics, PipelineStats};
use crate::scheduler::BackgroundFlusher;
use crate::throttle::{DEFAULT_THROTTLE_SLEEP, ThrottlePolicy};
use crate::transport::Transport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 50_000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_buffer_size: usize,
    pub flush_interval: Duration,
    pub throttle_sleep: Duration,
    pub throttle_policy: ThrottlePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            throttle_sleep: DEFAULT_THROTTLE_SLEEP,
            throttle_policy: ThrottlePolicy::SkipTick,
        }
    }
}

impl PipelineConfig {
    /// Events go out one at a time and hold their flush while throttled
    pub fn for_kind(kind: DataKind, base: PipelineConfig) -> Self {
        match kind {
            DataKind::Events => Self {
                batch_size: 1,
                throttle_policy: ThrottlePolicy::WaitForResume,
                ..base
            },
            _ => base,
        }
    }
}

/// A started-or-stopped delivery pipeline.
///
/// Lines are accepted whether or not the pipeline is running; only
/// scheduled delivery depends on `start`.
#[derive(Debug)]
pub struct Pipeline {
    handler: Arc<LineHandler>,
    flush_interval: Duration,
    flusher: Mutex<Option<BackgroundFlusher>>,
}

impl Pipeline {
    pub fn new(kind: DataKind, transport: Arc<dyn Transport>, config: PipelineConfig) -> Self {
        let handler = LineHandler::new(
            kind,
            transport,
            config.batch_size,
            config.max_buffer_size,
            config.throttle_sleep,
            config.throttle_policy,
        );

        Self {
            handler: Arc::new(handler),
            flush_interval: config.flush_interval,
            flusher: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> DataKind {
        self.handler.kind()
    }

    /// Begin periodic flushing. Has no effect if already running.
    #[instrument(skip(self), fields(kind = %self.kind()))]
    pub fn start(&self) {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return;
        }

        *flusher = Some(BackgroundFlusher::spawn(
            Arc::clone(&self.handler),
            self.flush_interval,
        ));
        info!("Started {} pipeline, flushing every {:?}", self.kind(), self.flush_interval);
    }

    pub fn is_running(&self) -> bool {
        self.flusher.lock().is_some()
    }

    /// Stop periodic flushing, then deliver everything still buffered.
    ///
    /// Safe to call more than once. Lines that fail the final delivery stay
    /// buffered and the error is returned.
    #[instrument(skip(self), fields(kind = %self.kind()))]
    pub async fn stop(&self) -> Result<()> {
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            flusher.shutdown().await;
            info!("Stopped {} pipeline", self.kind());
        }

        let result = self.handler.flush_all().await;
        if let Err(err) = &result {
            warn!(
                "Final flush of {} left {} lines buffered: {}",
                self.kind(),
                self.queue_size(),
                err
            );
        }
        result
    }

    pub fn enqueue(&self, line: Line) -> Result<()> {
        self.handler.handle_line(line)
    }

    /// Deliver at most one batch now
    pub async fn flush(&self) -> Result<()> {
        self.handler.flush().await
    }

    /// Deliver everything buffered now
    pub async fn flush_all(&self) -> Result<()> {
        self.handler.flush_all().await
    }

    pub fn failure_count(&self) -> u64 {
        self.handler.failure_count()
    }

    pub fn queue_size(&self) -> usize {
        self.handler.buffer().len()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.handler.buffer().remaining_capacity()
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        self.handler.metrics()
    }

    pub fn stats(&self) -> PipelineStats {
        let buffer = self.handler.buffer();
        self.handler
            .metrics()
            .snapshot(self.kind(), buffer.len(), buffer.capacity())
    }
}
