//! Plain TCP transport to a locally trusted proxy

use super::Transport;
use crate::errors::{Result, SenderError};
use crate::line::DataKind;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-lived newline-delimited stream.
///
/// A failed write tears the connection down; the next `send` or `flush`
/// reconnects before writing.
#[derive(Debug)]
pub struct StreamTransport {
    address: String,
    connect_timeout: Duration,
    connection: Mutex<Option<BufWriter<TcpStream>>>,
    failures: AtomicU64,
}

impl StreamTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            connection: Mutex::new(None),
            failures: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Establish the connection now instead of on first send
    pub async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            *connection = Some(self.open().await?);
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Push out anything still sitting in the write buffer
    pub async fn flush(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            *connection = Some(self.open().await?);
        }

        let Some(writer) = connection.as_mut() else {
            return Err(SenderError::Disconnected(self.address.clone()));
        };

        let flushed = writer.flush().await;
        if let Err(err) = flushed {
            self.reset(&mut connection, &err);
            return Err(SenderError::Io(err));
        }
        Ok(())
    }

    async fn open(&self) -> Result<BufWriter<TcpStream>> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SenderError::Timeout(self.connect_timeout))?
            .map_err(|err| {
                SenderError::Disconnected(format!(
                    "unable to connect to proxy at {}: {}",
                    self.address, err
                ))
            })?;

        stream.set_nodelay(true)?;
        info!("Connected to proxy at {}", self.address);
        Ok(BufWriter::new(stream))
    }

    fn reset(&self, connection: &mut Option<BufWriter<TcpStream>>, err: &std::io::Error) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        warn!("Resetting proxy connection to {}: {}", self.address, err);
        *connection = None;
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, kind: DataKind, payload: String) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_none() {
            *connection = Some(self.open().await?);
        }

        let Some(writer) = connection.as_mut() else {
            return Err(SenderError::Disconnected(self.address.clone()));
        };

        let written = match writer.write_all(payload.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };

        if let Err(err) = written {
            self.reset(&mut connection, &err);
            return Err(SenderError::Io(err));
        }

        debug!("Wrote {} bytes of {} to {}", payload.len(), kind, self.address);
        Ok(())
    }

    async fn close(&self) {
        let mut connection = self.connection.lock().await;
        if let Some(mut writer) = connection.take() {
            if let Err(err) = writer.shutdown().await {
                debug!("Error closing proxy connection to {}: {}", self.address, err);
            }
        }
    }

    fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
