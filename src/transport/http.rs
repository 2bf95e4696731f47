//! HTTP transport for direct ingestion or an HTTP-speaking proxy

use super::Transport;
use crate::auth::CredentialProvider;
use crate::errors::{Result, SenderError};
use crate::line::DataKind;
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

const REPORT_PATH: &str = "/report";
const EVENT_PATH: &str = "/api/v2/event";
const FORMAT_KEY: &str = "f";

const OCTET_STREAM: &str = "application/octet-stream";
const APPLICATION_JSON: &str = "application/json";
const GZIP: &str = "gzip";

/// Client with the sender's user agent and a per-request timeout
pub fn http_client(http_timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(http_timeout)
        .user_agent(format!("telemetry_sender/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(SenderError::Http)
}

/// Request/response transport: one POST per batch
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    credentials: CredentialProvider,
}

impl HttpTransport {
    /// Create a new HTTP transport rooted at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        http_timeout: Duration,
        credentials: CredentialProvider,
    ) -> Result<Self> {
        Ok(Self::with_client(http_client(http_timeout)?, base_url, credentials))
    }

    /// Build on top of an existing client (shared connection pool)
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        credentials: CredentialProvider,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn report_url(&self) -> String {
        format!("{}{}", self.base_url, REPORT_PATH)
    }

    pub fn event_url(&self) -> String {
        format!("{}{}", self.base_url, EVENT_PATH)
    }

    fn build_request(&self, kind: DataKind, payload: String) -> Result<RequestBuilder> {
        if kind == DataKind::Events {
            return Ok(self
                .client
                .post(self.event_url())
                .header(CONTENT_TYPE, APPLICATION_JSON)
                .body(payload));
        }

        let body = gzip(payload.as_bytes())?;
        Ok(self
            .client
            .post(self.report_url())
            .query(&[(FORMAT_KEY, kind.format())])
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(CONTENT_ENCODING, GZIP)
            .body(body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, kind: DataKind, payload: String) -> Result<()> {
        let bytes = payload.len();
        let request = self.build_request(kind, payload)?;
        let request = self.credentials.authorize(request).await?;

        debug!("Sending {} bytes of {} to {}", bytes, kind, self.base_url);

        let response = request.send().await.map_err(SenderError::Http)?;
        handle_response(response, kind).await
    }

    async fn close(&self) {
        self.credentials.close().await;
    }
}

/// Map the response status onto an outcome
async fn handle_response(response: Response, kind: DataKind) -> Result<()> {
    let status = response.status();

    if status.is_success() {
        return Ok(());
    }

    if is_overload(status) {
        warn!("Remote asked to slow down {} delivery (status {})", kind, status);
        return Err(SenderError::Throttled {
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(SenderError::Status {
        status: status.as_u16(),
        body,
    })
}

fn is_overload(status: StatusCode) -> bool {
    status == StatusCode::NOT_ACCEPTABLE || status == StatusCode::TOO_MANY_REQUESTS
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new(
            "http://localhost:8080/",
            Duration::from_secs(10),
            CredentialProvider::None,
        )
        .unwrap();

        assert_eq!(transport.base_url(), "http://localhost:8080");
        assert_eq!(transport.report_url(), "http://localhost:8080/report");
        assert_eq!(transport.event_url(), "http://localhost:8080/api/v2/event");
    }

    #[test]
    fn test_report_request_shape() {
        let transport = HttpTransport::new(
            "http://localhost:8010/wavefront",
            Duration::from_secs(1),
            CredentialProvider::None,
        )
        .unwrap();

        let request = transport
            .build_request(DataKind::Points, "cpu 1\n".to_string())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://localhost:8010/wavefront/report?f=wavefront"
        );
        assert_eq!(request.headers()[CONTENT_ENCODING], "gzip");
        assert_eq!(request.headers()[CONTENT_TYPE], OCTET_STREAM);
    }

    #[test]
    fn test_event_request_is_plain_json() {
        let transport = HttpTransport::new(
            "http://localhost:8010",
            Duration::from_secs(1),
            CredentialProvider::None,
        )
        .unwrap();

        let request = transport
            .build_request(DataKind::Events, "{\"name\":\"deploy\"}".to_string())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "http://localhost:8010/api/v2/event");
        assert!(request.url().query().is_none());
        assert_eq!(request.headers()[CONTENT_TYPE], APPLICATION_JSON);
        assert!(request.headers().get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_gzip_round_trip() {
        let compressed = gzip(b"a 1\nb 2\n").unwrap();
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "a 1\nb 2\n");
    }

    #[test]
    fn test_overload_statuses() {
        assert!(is_overload(StatusCode::NOT_ACCEPTABLE));
        assert!(is_overload(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_overload(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_overload(StatusCode::UNAUTHORIZED));
    }
}
