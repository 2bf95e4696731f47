//! Periodic background flushing for one pipeline

use crate::dispatcher::{LineHandler, ScheduledFlush};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a running flush loop
#[derive(Debug)]
pub struct BackgroundFlusher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundFlusher {
    /// Start flushing `handler` every `period`, first tick one period from now
    pub fn spawn(handler: Arc<LineHandler>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { flush_loop(handler, period, token).await });

        Self { cancel, handle }
    }

    /// Stop scheduling and wait for the loop to exit.
    ///
    /// A flush already running completes first; a throttle wait does not.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            warn!("Flush task ended abnormally: {}", err);
        }
    }
}

async fn flush_loop(handler: Arc<LineHandler>, period: Duration, cancel: CancellationToken) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("Flush loop started for {} every {:?}", handler.kind(), period);

    'ticks: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // the window may be extended while waiting, so it is checked again
        loop {
            match handler.scheduled_flush().await {
                ScheduledFlush::Flushed(Ok(())) => break,
                ScheduledFlush::Flushed(Err(err)) => {
                    warn!("Scheduled flush of {} failed: {}", handler.kind(), err);
                    break;
                }
                ScheduledFlush::Skipped { resume_at } => {
                    debug!(
                        "{} throttled, skipping flush ({:?} left)",
                        handler.kind(),
                        resume_at.saturating_duration_since(Instant::now())
                    );
                    break;
                }
                ScheduledFlush::Wait { resume_at } => {
                    debug!("{} throttled, holding flush until the window closes", handler.kind());
                    tokio::select! {
                        _ = cancel.cancelled() => break 'ticks,
                        _ = tokio::time::sleep_until(resume_at) => {}
                    }
                }
            }
        }
    }

    debug!("Flush loop stopped for {}", handler.kind());
}
