//! Telemetry Sender Library
//!
//! Buffers pre-rendered telemetry lines (points, histograms, spans, span logs
//! and events) per data kind and delivers them in batches over HTTP or to a
//! proxy over TCP, with backpressure when the remote service is overloaded.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod line;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod sender;
pub mod throttle;
pub mod transport;

pub use auth::{Authentication, CredentialProvider, calculate_refresh_interval};
pub use config::{Config, Endpoint};
pub use errors::{ErrorKind, Result, SenderError};
pub use line::{DataKind, Line};
pub use metrics::{PipelineStats, SenderStats};
pub use pipeline::{Pipeline, PipelineConfig};
pub use sender::{Destinations, Sender};
pub use transport::{HttpTransport, StreamTransport, Transport};
