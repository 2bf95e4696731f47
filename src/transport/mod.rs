//! Delivery of joined batches to the remote endpoint

mod http;
mod stream;

pub use http::{HttpTransport, http_client};
pub use stream::{DEFAULT_CONNECT_TIMEOUT, StreamTransport};

use crate::errors::Result;
use crate::line::DataKind;
use async_trait::async_trait;

/// Sends one batch payload for a data kind.
///
/// The error returned carries the outcome classification
/// (see [`crate::errors::ErrorKind`]): retryable, overload or authentication.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, kind: DataKind, payload: String) -> Result<()>;

    /// Release connections and background work held by this transport
    async fn close(&self) {}

    /// Failures observed below the batch level (for example broken writes)
    fn failure_count(&self) -> u64 {
        0
    }
}
