//! Batched delivery of buffered lines with failure classification

use crate::buffer::LineBuffer;
use crate::errors::{ErrorKind, Result, SenderError};
use crate::line::{DataKind, Line, join_payload};
use crate::metrics::PipelineMetrics;
use crate::throttle::{ThrottleDecision, ThrottlePolicy, ThrottleWindow};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Result of one scheduled flush attempt
#[derive(Debug)]
pub enum ScheduledFlush {
    /// The window was closed; holds the outcome of the drained batch
    Flushed(Result<()>),
    /// The window was open and the tick was dropped
    Skipped { resume_at: Instant },
    /// The window was open; retry once it closes
    Wait { resume_at: Instant },
}

/// Drains one buffer in batches and hands them to a transport.
///
/// The `window` mutex serializes drains and guards the throttle window, so
/// "check throttle" and "open throttle" never race. It is held across the
/// transport call.
#[derive(Debug)]
pub struct LineHandler {
    kind: DataKind,
    buffer: LineBuffer,
    transport: Arc<dyn Transport>,
    batch_size: usize,
    throttle_policy: ThrottlePolicy,
    window: Mutex<ThrottleWindow>,
    metrics: Arc<PipelineMetrics>,
}

impl LineHandler {
    pub fn new(
        kind: DataKind,
        transport: Arc<dyn Transport>,
        batch_size: usize,
        max_buffer_size: usize,
        throttle_sleep: Duration,
        throttle_policy: ThrottlePolicy,
    ) -> Self {
        Self {
            kind,
            buffer: LineBuffer::new(max_buffer_size),
            transport,
            batch_size: batch_size.max(1),
            throttle_policy,
            window: Mutex::new(ThrottleWindow::new(throttle_sleep)),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Admit a line without waiting. A full buffer rejects it.
    pub fn handle_line(&self, line: Line) -> Result<()> {
        match self.buffer.try_enqueue(line) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                self.metrics.record_dropped(1);
                self.metrics.record_failure();
                debug!(
                    "{} buffer full ({} lines), dropping line of {} bytes",
                    self.kind,
                    self.buffer.capacity(),
                    rejected.len()
                );
                Err(SenderError::BufferFull { kind: self.kind })
            }
        }
    }

    /// Deliver at most one batch
    pub async fn flush(&self) -> Result<()> {
        let mut window = self.window.lock().await;
        let batch = self.buffer.drain_up_to(self.batch_size);
        if batch.is_empty() {
            return Ok(());
        }
        self.deliver(batch, &mut window).await
    }

    /// Deliver everything buffered at call time, one batch at a time.
    ///
    /// Stops at the first failing batch; the rest stays queued.
    pub async fn flush_all(&self) -> Result<()> {
        let mut window = self.window.lock().await;
        let mut remaining = self.buffer.len();

        while remaining > 0 {
            let batch = self.buffer.drain_up_to(self.batch_size.min(remaining));
            if batch.is_empty() {
                break;
            }
            remaining -= batch.len();
            self.deliver(batch, &mut window).await?;
        }

        Ok(())
    }

    /// Check the throttle window and deliver at most one batch under a
    /// single lock hold. Nothing is drained while the window is open.
    pub async fn scheduled_flush(&self) -> ScheduledFlush {
        let mut window = self.window.lock().await;
        match window.decide(Instant::now(), self.throttle_policy) {
            ThrottleDecision::Skip { resume_at } => return ScheduledFlush::Skipped { resume_at },
            ThrottleDecision::WaitUntil { resume_at } => return ScheduledFlush::Wait { resume_at },
            ThrottleDecision::Proceed => {}
        }

        let batch = self.buffer.drain_up_to(self.batch_size);
        if batch.is_empty() {
            return ScheduledFlush::Flushed(Ok(()));
        }
        ScheduledFlush::Flushed(self.deliver(batch, &mut window).await)
    }

    pub async fn resume_at(&self) -> Option<Instant> {
        self.window.lock().await.resume_at()
    }

    pub fn failure_count(&self) -> u64 {
        self.metrics.failures()
    }

    pub fn throttled_count(&self) -> u64 {
        self.metrics.throttled()
    }

    async fn deliver(&self, batch: Vec<Line>, window: &mut ThrottleWindow) -> Result<()> {
        let count = batch.len();
        let payload = join_payload(&batch);

        let err = match self.transport.send(self.kind, payload).await {
            Ok(()) => {
                self.metrics.record_delivered(count);
                debug!("Delivered {} {} lines", count, self.kind);
                return Ok(());
            }
            Err(err) => err,
        };

        self.metrics.record_failure();

        match err.kind() {
            ErrorKind::Authentication => {
                self.metrics.record_dropped(count);
                error!(
                    "Authentication failed reporting {} data, dropping {} lines: {}",
                    self.kind, count, err
                );
            }
            ErrorKind::Overload => {
                let resume_at = window.open(Instant::now());
                self.metrics.record_throttled();
                self.requeue(batch);
                warn!(
                    "{} delivery throttled, pausing scheduled flushes for {:?}",
                    self.kind,
                    resume_at.saturating_duration_since(Instant::now())
                );
            }
            _ => {
                self.requeue(batch);
                warn!("Error reporting {} data, buffering {} lines: {}", self.kind, count, err);
            }
        }

        Err(err)
    }

    fn requeue(&self, batch: Vec<Line>) {
        let dropped = self.buffer.requeue(batch);
        if dropped > 0 {
            self.metrics.record_dropped(dropped);
            warn!("{} buffer full, dropped {} lines while re-buffering", self.kind, dropped);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Outcome a [`FakeTransport`] reports for each send
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Outcome {
        Success,
        NetworkError,
        ServerError,
        Throttled,
        AuthError,
    }

    #[derive(Debug)]
    pub(crate) struct FakeTransport {
        outcome: parking_lot::Mutex<Outcome>,
        payloads: parking_lot::Mutex<Vec<(DataKind, String)>>,
        calls: AtomicUsize,
        delay: parking_lot::Mutex<Duration>,
    }

    impl FakeTransport {
        pub(crate) fn new(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: parking_lot::Mutex::new(outcome),
                payloads: parking_lot::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                delay: parking_lot::Mutex::new(Duration::ZERO),
            })
        }

        /// Make every send take `delay` before reporting its outcome
        pub(crate) fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        pub(crate) fn set_outcome(&self, outcome: Outcome) {
            *self.outcome.lock() = outcome;
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn delivered_lines(&self) -> usize {
            self.payloads
                .lock()
                .iter()
                .map(|(_, payload)| payload.lines().count())
                .sum()
        }

        pub(crate) fn payloads(&self) -> Vec<(DataKind, String)> {
            self.payloads.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, kind: DataKind, payload: String) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = *self.outcome.lock();
            match outcome {
                Outcome::Success => {
                    self.payloads.lock().push((kind, payload));
                    Ok(())
                }
                Outcome::NetworkError => Err(SenderError::Io(std::io::Error::other(
                    "connection reset",
                ))),
                Outcome::ServerError => Err(SenderError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
                Outcome::Throttled => Err(SenderError::Throttled { status: 406 }),
                Outcome::AuthError => Err(SenderError::Auth("token rejected".to_string())),
            }
        }
    }

    fn handler(transport: Arc<FakeTransport>, capacity: usize, batch_size: usize) -> LineHandler {
        LineHandler::new(
            DataKind::Points,
            transport,
            batch_size,
            capacity,
            Duration::from_secs(30),
            ThrottlePolicy::SkipTick,
        )
    }

    fn add_lines(handler: &LineHandler, count: usize) {
        for i in 0..count {
            handler.handle_line(Line::new(format!("dummy.metric {} source=test\n", i))).unwrap();
        }
    }

    #[tokio::test]
    async fn test_capacity() {
        let handler = handler(FakeTransport::new(Outcome::Success), 100, 10);
        add_lines(&handler, 100);

        let err = handler.handle_line(Line::from("one.too.many 1\n")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Admission);
        assert_eq!(handler.metrics().dropped(), 1);
        assert_eq!(handler.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_delivers_one_batch() {
        let transport = FakeTransport::new(Outcome::Success);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 100);

        handler.flush().await.unwrap();
        assert_eq!(handler.buffer().len(), 90);
        assert_eq!(transport.delivered_lines(), 10);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_flush_empty_buffer_skips_transport() {
        let transport = FakeTransport::new(Outcome::Success);
        let handler = handler(Arc::clone(&transport), 100, 10);

        handler.flush().await.unwrap();
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_is_appended_back() {
        let transport = FakeTransport::new(Outcome::NetworkError);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 100);

        let err = handler.flush().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(handler.buffer().len(), 100);

        // the 90 survivors come first, the retried 10 after them
        let all = handler.buffer().drain_up_to(100);
        assert_eq!(all[0].as_str(), "dummy.metric 10 source=test\n");
        assert_eq!(all[90].as_str(), "dummy.metric 0 source=test\n");
        assert_eq!(all[99].as_str(), "dummy.metric 9 source=test\n");
    }

    #[tokio::test]
    async fn test_server_error_requeues() {
        let transport = FakeTransport::new(Outcome::ServerError);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 5);

        assert!(handler.flush().await.is_err());
        assert_eq!(handler.buffer().len(), 5);
        assert_eq!(handler.failure_count(), 1);
        assert_eq!(handler.metrics().dropped(), 0);
    }

    #[tokio::test]
    async fn test_requeue_drops_overflow() {
        let transport = FakeTransport::new(Outcome::NetworkError);
        let handler = handler(Arc::clone(&transport), 10, 10);
        add_lines(&handler, 10);

        // refill the buffer while the batch is "in flight" by draining manually
        let batch = handler.buffer().drain_up_to(10);
        add_lines(&handler, 7);
        handler.requeue(batch);

        assert_eq!(handler.buffer().len(), 10);
        assert_eq!(handler.metrics().dropped(), 7);
    }

    #[tokio::test]
    async fn test_auth_error_drops_batch() {
        let transport = FakeTransport::new(Outcome::AuthError);
        let handler = handler(Arc::clone(&transport), 100, 10);
        handler.handle_line(Line::from("metric but the credentials are wrong 1\n")).unwrap();

        let err = handler.flush().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(handler.buffer().len(), 0);
        assert_eq!(handler.metrics().dropped(), 1);

        transport.set_outcome(Outcome::NetworkError);
        handler.handle_line(Line::from("metric but the network timed out 1\n")).unwrap();
        assert!(handler.flush().await.is_err());
        assert_eq!(handler.buffer().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overload_requeues_and_opens_window() {
        let transport = FakeTransport::new(Outcome::Throttled);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 10);

        let before = Instant::now();
        let err = handler.flush().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overload);
        assert_eq!(handler.buffer().len(), 10);
        assert_eq!(handler.throttled_count(), 1);

        let first = handler.resume_at().await.unwrap();
        assert_eq!(first, before + Duration::from_secs(30));
        assert!(matches!(
            handler.scheduled_flush().await,
            ScheduledFlush::Skipped { .. }
        ));
        assert_eq!(transport.calls(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(handler.flush().await.is_err());
        let second = handler.resume_at().await.unwrap();
        assert!(second >= first);
        assert_eq!(handler.throttled_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_flush_waits_out_open_window() {
        let transport = FakeTransport::new(Outcome::Throttled);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 15);

        assert!(handler.flush().await.is_err());
        transport.set_outcome(Outcome::Success);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(5)).await;
            match handler.scheduled_flush().await {
                ScheduledFlush::Skipped { resume_at } => {
                    assert_eq!(Some(resume_at), handler.resume_at().await)
                }
                other => panic!("expected a skipped tick, got {:?}", other),
            }
        }
        assert_eq!(transport.calls(), 1);
        assert_eq!(handler.buffer().len(), 15);

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(matches!(
            handler.scheduled_flush().await,
            ScheduledFlush::Flushed(Ok(()))
        ));
        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.delivered_lines(), 10);
        assert_eq!(handler.buffer().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_flush_reports_wait_under_wait_policy() {
        let transport = FakeTransport::new(Outcome::Throttled);
        let handler = LineHandler::new(
            DataKind::Spans,
            Arc::clone(&transport) as Arc<dyn Transport>,
            10,
            100,
            Duration::from_secs(30),
            ThrottlePolicy::WaitForResume,
        );
        add_lines(&handler, 3);

        let before = Instant::now();
        assert!(handler.flush().await.is_err());
        match handler.scheduled_flush().await {
            ScheduledFlush::Wait { resume_at } => {
                assert_eq!(resume_at, before + Duration::from_secs(30))
            }
            other => panic!("expected a wait, got {:?}", other),
        }
        assert_eq!(transport.calls(), 1);
        assert_eq!(handler.buffer().len(), 3);
    }

    #[tokio::test]
    async fn test_scheduled_flush_empty_buffer() {
        let transport = FakeTransport::new(Outcome::Success);
        let handler = handler(Arc::clone(&transport), 100, 10);

        assert!(matches!(
            handler.scheduled_flush().await,
            ScheduledFlush::Flushed(Ok(()))
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_flush_all_drains_in_batches() {
        let transport = FakeTransport::new(Outcome::Success);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 95);

        handler.flush_all().await.unwrap();
        assert_eq!(handler.buffer().len(), 0);
        assert_eq!(transport.calls(), 10);
        assert_eq!(transport.delivered_lines(), 95);
    }

    #[tokio::test]
    async fn test_flush_all_stops_at_first_failure() {
        let transport = FakeTransport::new(Outcome::ServerError);
        let handler = handler(Arc::clone(&transport), 100, 10);
        add_lines(&handler, 50);

        assert!(handler.flush_all().await.is_err());
        assert_eq!(transport.calls(), 1);
        assert_eq!(handler.buffer().len(), 50);
    }
}
