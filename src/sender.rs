//! Sender facade: one pipeline per data kind over shared transports

use crate::auth::CredentialProvider;
use crate::config::{Config, Endpoint};
use crate::errors::{Result, SenderError};
use crate::line::{DataKind, Line};
use crate::metrics::SenderStats;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::transport::{HttpTransport, StreamTransport, Transport, http_client};
use futures::future::join_all;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Transports each data kind is routed to.
///
/// Points and events use `metrics`, histograms use `distribution`, spans and
/// span logs use `traces`. Entries may share one transport.
#[derive(Debug, Clone)]
pub struct Destinations {
    pub metrics: Arc<dyn Transport>,
    pub distribution: Arc<dyn Transport>,
    pub traces: Arc<dyn Transport>,
}

impl Destinations {
    /// Every kind goes through the same transport
    pub fn single(transport: Arc<dyn Transport>) -> Self {
        Self {
            metrics: Arc::clone(&transport),
            distribution: Arc::clone(&transport),
            traces: transport,
        }
    }

    /// Build the transports described by `config`
    pub fn from_config(config: &Config, credentials: &CredentialProvider) -> Result<Self> {
        match &config.endpoint {
            Endpoint::Http {
                server_url,
                traces_url,
            } => {
                let client = http_client(config.http_timeout)?;

                let metrics: Arc<dyn Transport> = Arc::new(HttpTransport::with_client(
                    client.clone(),
                    server_url.clone(),
                    credentials.clone(),
                ));
                let traces: Arc<dyn Transport> = match traces_url {
                    Some(url) => Arc::new(HttpTransport::with_client(
                        client,
                        url.clone(),
                        credentials.clone(),
                    )),
                    None => Arc::clone(&metrics),
                };

                info!("Reporting over HTTP to {}", server_url);
                Ok(Self {
                    distribution: Arc::clone(&metrics),
                    metrics,
                    traces,
                })
            }
            Endpoint::Stream {
                host,
                metrics_port,
                distribution_port,
                tracing_port,
            } => {
                let stream = |port: u16| -> Arc<dyn Transport> {
                    Arc::new(StreamTransport::new(
                        format!("{}:{}", host, port),
                        config.connect_timeout,
                    ))
                };

                let metrics = stream(*metrics_port);
                let distribution = match distribution_port {
                    Some(port) if port != metrics_port => stream(*port),
                    _ => Arc::clone(&metrics),
                };
                let traces = if tracing_port == metrics_port {
                    Arc::clone(&metrics)
                } else {
                    stream(*tracing_port)
                };

                info!("Reporting to proxy at {}", host);
                Ok(Self {
                    metrics,
                    distribution,
                    traces,
                })
            }
        }
    }

    pub fn for_kind(&self, kind: DataKind) -> &Arc<dyn Transport> {
        match kind {
            DataKind::Points | DataKind::Events => &self.metrics,
            DataKind::Histograms => &self.distribution,
            DataKind::Spans | DataKind::SpanLogs => &self.traces,
        }
    }

    /// Each distinct transport once
    fn unique(&self) -> Vec<Arc<dyn Transport>> {
        let mut unique: Vec<Arc<dyn Transport>> = Vec::with_capacity(3);
        for transport in [&self.metrics, &self.distribution, &self.traces] {
            if !unique.iter().any(|seen| Arc::ptr_eq(seen, transport)) {
                unique.push(Arc::clone(transport));
            }
        }
        unique
    }
}

#[derive(Debug)]
struct Pipelines {
    points: Pipeline,
    histograms: Pipeline,
    spans: Pipeline,
    span_logs: Pipeline,
    events: Pipeline,
}

impl Pipelines {
    fn new(destinations: &Destinations, base: PipelineConfig) -> Self {
        let build = |kind: DataKind| {
            Pipeline::new(
                kind,
                Arc::clone(destinations.for_kind(kind)),
                PipelineConfig::for_kind(kind, base),
            )
        };

        Self {
            points: build(DataKind::Points),
            histograms: build(DataKind::Histograms),
            spans: build(DataKind::Spans),
            span_logs: build(DataKind::SpanLogs),
            events: build(DataKind::Events),
        }
    }

    fn get(&self, kind: DataKind) -> &Pipeline {
        match kind {
            DataKind::Points => &self.points,
            DataKind::Histograms => &self.histograms,
            DataKind::Spans => &self.spans,
            DataKind::SpanLogs => &self.span_logs,
            DataKind::Events => &self.events,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Pipeline> {
        DataKind::ALL.into_iter().map(move |kind| self.get(kind))
    }
}

/// Accepts pre-rendered lines of every data kind and delivers them in the
/// background
#[derive(Debug)]
pub struct Sender {
    sender_id: String,
    pipelines: Pipelines,
    transports: Vec<Arc<dyn Transport>>,
    credentials: CredentialProvider,
    closed: AtomicBool,
}

impl Sender {
    /// Create a sender from configuration and start its pipelines.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().map_err(SenderError::Config)?;

        let credentials = CredentialProvider::from_authentication(
            &config.authentication,
            config.http_timeout,
            config.token_refresh_fallback,
        )?;
        let destinations = Destinations::from_config(&config, &credentials)?;

        Ok(Self::build(&config, destinations, credentials))
    }

    /// Create a sender over caller-provided transports and start its pipelines
    pub fn with_destinations(config: &Config, destinations: Destinations) -> Result<Self> {
        config.validate().map_err(SenderError::Config)?;
        Ok(Self::build(config, destinations, CredentialProvider::None))
    }

    fn build(config: &Config, destinations: Destinations, credentials: CredentialProvider) -> Self {
        let pipelines = Pipelines::new(&destinations, config.pipeline_config());
        let sender = Self {
            sender_id: Uuid::new_v4().to_string(),
            pipelines,
            transports: destinations.unique(),
            credentials,
            closed: AtomicBool::new(false),
        };

        for pipeline in sender.pipelines.iter() {
            pipeline.start();
        }
        info!("Sender {} started", sender.sender_id);

        sender
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn pipeline(&self, kind: DataKind) -> &Pipeline {
        self.pipelines.get(kind)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue one pre-rendered line. Never waits on delivery.
    pub fn send_line(&self, kind: DataKind, line: impl Into<Line>) -> Result<()> {
        if self.is_closed() {
            return Err(SenderError::Closed);
        }

        let pipeline = self.pipelines.get(kind);
        pipeline.metrics().record_valid();
        pipeline.enqueue(line.into())
    }

    /// Queue the output of an encoder, counting encoder failures as invalid
    pub fn send_rendered<E: Display>(
        &self,
        kind: DataKind,
        rendered: std::result::Result<String, E>,
    ) -> Result<()> {
        match rendered {
            Ok(line) => self.send_line(kind, line),
            Err(err) => {
                self.pipelines.get(kind).metrics().record_invalid();
                debug!("Dropping invalid {} line: {}", kind, err);
                Err(SenderError::InvalidLine(err.to_string()))
            }
        }
    }

    /// Deliver everything buffered in every pipeline now.
    ///
    /// All pipelines are attempted; the first error is returned.
    pub async fn flush(&self) -> Result<()> {
        let results = join_all(self.pipelines.iter().map(|pipeline| pipeline.flush_all())).await;
        results.into_iter().collect()
    }

    /// Stop every pipeline (delivering what is left), then release transports
    /// and credentials. Later calls do nothing; later sends are rejected.
    #[instrument(skip(self), fields(sender_id = %self.sender_id))]
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!("Closing sender {}", self.sender_id);

        let results = join_all(self.pipelines.iter().map(|pipeline| pipeline.stop())).await;

        for transport in &self.transports {
            transport.close().await;
        }
        self.credentials.close().await;

        let stats = self.stats();
        if stats.total_queued() > 0 {
            warn!(
                "Sender {} closed with {} lines undelivered",
                self.sender_id,
                stats.total_queued()
            );
        }

        results.into_iter().collect()
    }

    /// Failed batches across all pipelines plus broken stream writes
    pub fn failure_count(&self) -> u64 {
        let pipelines: u64 = self.pipelines.iter().map(Pipeline::failure_count).sum();
        pipelines + self.transport_failures()
    }

    fn transport_failures(&self) -> u64 {
        self.transports.iter().map(|t| t.failure_count()).sum()
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            sender_id: self.sender_id.clone(),
            pipelines: self.pipelines.iter().map(Pipeline::stats).collect(),
            transport_failures: self.transport_failures(),
        }
    }
}
