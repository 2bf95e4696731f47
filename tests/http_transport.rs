use flate2::read::GzDecoder;
use std::io::Read;
use std::time::Duration;
use telemetry_sender::errors::ErrorKind;
use telemetry_sender::{CredentialProvider, DataKind, HttpTransport, Transport};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gunzip(body: &[u8]) -> String {
    let mut decoded = String::new();
    GzDecoder::new(body).read_to_string(&mut decoded).unwrap();
    decoded
}

fn transport(server: &MockServer, credentials: CredentialProvider) -> HttpTransport {
    HttpTransport::new(server.uri(), Duration::from_secs(5), credentials).unwrap()
}

#[tokio::test]
async fn test_points_are_gzipped_with_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report"))
        .and(query_param("f", "wavefront"))
        .and(header("content-encoding", "gzip"))
        .and(header("content-type", "application/octet-stream"))
        .and(header("authorization", "Bearer ingest-token"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server, CredentialProvider::static_token("ingest-token"));
    transport
        .send(DataKind::Points, "cpu.load 1.5 source=web-1\nmem.used 42 source=web-1\n".to_string())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        gunzip(&requests[0].body),
        "cpu.load 1.5 source=web-1\nmem.used 42 source=web-1\n"
    );
}

#[tokio::test]
async fn test_trace_formats() {
    let server = MockServer::start().await;
    for format in ["trace", "spanLogs", "histogram"] {
        Mock::given(method("POST"))
            .and(path("/report"))
            .and(query_param("f", format))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let transport = transport(&server, CredentialProvider::None);
    transport.send(DataKind::Spans, "getUser source=a 1 2\n".to_string()).await.unwrap();
    transport.send(DataKind::SpanLogs, "{\"logs\":[]}\n".to_string()).await.unwrap();
    transport.send(DataKind::Histograms, "!M 1 #2 10 latency\n".to_string()).await.unwrap();

    for request in server.received_requests().await.unwrap() {
        assert!(request.headers.get("authorization").is_none());
    }
}

#[tokio::test]
async fn test_events_are_plain_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/event"))
        .and(header("content-type", "application/json"))
        .and(body_string("{\"name\":\"deploy\"}\n"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport(&server, CredentialProvider::static_token("t"));
    transport
        .send(DataKind::Events, "{\"name\":\"deploy\"}\n".to_string())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_overload_statuses() {
    for status in [406, 429] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = transport(&server, CredentialProvider::None)
            .send(DataKind::Points, "m 1\n".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overload, "status {}", status);
    }
}

#[tokio::test]
async fn test_other_failures_are_retryable() {
    for status in [400, 401, 500, 503] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = transport(&server, CredentialProvider::None)
            .send(DataKind::Points, "m 1\n".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retryable, "status {}", status);
        assert!(err.to_string().contains("nope"));
    }
}

#[tokio::test]
async fn test_unreachable_server_is_retryable() {
    // bind then drop so nothing listens on the port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let transport =
        HttpTransport::new(uri, Duration::from_secs(1), CredentialProvider::None).unwrap();
    let err = transport
        .send(DataKind::Points, "m 1\n".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retryable);
}

#[tokio::test]
async fn test_requests_carry_user_agent() {
    let agent = format!("telemetry_sender/{}", env!("CARGO_PKG_VERSION"));
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/report"))
        .and(header("user-agent", agent.as_str()))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server, CredentialProvider::None)
        .send(DataKind::Points, "m 1\n".to_string())
        .await
        .unwrap();
}
