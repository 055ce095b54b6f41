use std::net::SocketAddr;
use std::time::Duration;

use http::header::CONTENT_LENGTH;
use http::{Method, Request};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use super::request::{
    AUTH_TOKEN, channel, channel_from_path, content_length, header_str, read_body, read_head,
};
use super::serve;
use crate::broker::Hub;
use crate::config::HubSettings;
use crate::utils::error::TransportError;

async fn start_server(settings: HubSettings) -> (SocketAddr, Hub, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Can't bind");
    let addr = listener.local_addr().unwrap();
    let hub = Hub::new(settings);
    let (stop, stopped) = oneshot::channel::<()>();

    tokio::spawn(serve(listener, hub.clone(), async move {
        let _ = stopped.await;
    }));

    (addr, hub, stop)
}

/// Sends one request and reads the response until the server closes.
async fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    stream.write_all(raw.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(2), stream.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8(response).unwrap()
}

fn post(channel: &str, body: &str, extra_headers: &str) -> String {
    format!(
        "POST /{channel} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

async fn open_stream(addr: SocketAddr, channel: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    stream
        .write_all(format!("GET /{channel} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\n\n") {
        let mut byte = [0u8; 1];
        timeout(Duration::from_secs(2), stream.read_exact(&mut byte))
            .await
            .expect("no preamble")
            .unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\n"));
    assert!(head.contains("Content-Type: text/event-stream\n"));
    stream
}

async fn wait_for_count(hub: &Hub, channel: &str, expected: usize) {
    for _ in 0..200 {
        if hub.subscriber_count(channel).await.unwrap() == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("channel '{channel}' never reached {expected} subscribers");
}

#[test]
fn test_channel_from_path() {
    assert_eq!(channel_from_path("/news"), Some("news"));
    assert_eq!(channel_from_path("/news-1_a?x=1"), Some("news-1_a"));
    assert_eq!(channel_from_path("/"), None);
    assert_eq!(channel_from_path("/News"), None);
    assert_eq!(channel_from_path("/a/b"), None);
    assert_eq!(channel_from_path("news"), None);
}

#[tokio::test]
async fn test_read_head_and_body() {
    let raw = b"POST /news HTTP/1.1\r\nContent-Length: 11\r\nAuth-Token: abc\r\n\r\n{\"id\":1}xyz";
    let (mut client, mut server) = tokio::io::duplex(4096);
    client.write_all(raw).await.unwrap();

    let (head, buffered) = read_head(&mut server).await.unwrap();
    assert_eq!(head.method(), Method::POST);
    assert_eq!(channel(&head), Some("news"));
    assert_eq!(header_str(head.headers(), AUTH_TOKEN), Some("abc"));
    assert_eq!(content_length(head.headers()), Some(11));

    let body = read_body(&mut server, &head, buffered).await.unwrap();
    assert_eq!(body, b"{\"id\":1}xyz");
}

#[tokio::test]
async fn test_read_body_rejects_oversized() {
    let head = Request::post("/news")
        .header(CONTENT_LENGTH, "99999999")
        .body(())
        .unwrap();
    let (_client, mut server) = tokio::io::duplex(64);
    let result = read_body(&mut server, &head, Vec::new()).await;
    assert!(matches!(result, Err(TransportError::BodyTooLarge(_))));
}

#[tokio::test]
async fn test_subscribe_and_publish_over_http() {
    let (addr, hub, _stop) = start_server(HubSettings::default()).await;
    let mut stream = open_stream(addr, "news").await;
    wait_for_count(&hub, "news", 1).await;

    let response = request(addr, &post("news", r#"{"id":1,"event":"foo","data":"bar"}"#, "")).await;
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"));

    let expected = "id: 1\nevent: foo\ndata: bar\n\n";
    let mut frame = vec![0u8; expected.len()];
    timeout(Duration::from_secs(2), stream.read_exact(&mut frame))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, expected.as_bytes());
}

#[tokio::test]
async fn test_read_head_rejects_invalid_header() {
    let raw = b"GET /news HTTP/1.1\r\nBad Header: x\r\n\r\n";
    let (mut client, mut server) = tokio::io::duplex(4096);
    client.write_all(raw).await.unwrap();

    let result = read_head(&mut server).await;
    assert!(matches!(result, Err(TransportError::Parse(_))));
}

#[tokio::test]
async fn test_error_response_format() {
    let (addr, _hub, _stop) = start_server(HubSettings::default()).await;
    let raw = "POST /news HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 99999999\r\n\r\n";
    let response = request(addr, raw).await;

    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(head.contains("content-type: text/plain; charset=utf-8\r\n"));
    assert!(head.contains(&format!("content-length: {}\r\n", body.len())));
    assert!(head.contains("connection: close\r\n"));
    assert_eq!(body, "Error: Request body exceeds 1048576 bytes.\n");
}

#[tokio::test]
async fn test_malformed_payload_still_created() {
    let (addr, _hub, _stop) = start_server(HubSettings::default()).await;
    let response = request(addr, &post("news", "{broken", "")).await;
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"));
}

#[tokio::test]
async fn test_subscribe_to_all_rejected() {
    let (addr, hub, _stop) = start_server(HubSettings::default()).await;
    let response = request(addr, "GET /all HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("reserved for global notifications"));
    assert!(hub.topic_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_channel_not_found() {
    let (addr, _hub, _stop) = start_server(HubSettings::default()).await;
    let response = request(addr, "GET /Bad.Name HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(response.ends_with("Error: Invalid channel name.\n"));
}

#[tokio::test]
async fn test_publish_requires_json_content_type() {
    let (addr, _hub, _stop) = start_server(HubSettings::default()).await;
    let raw = "POST /news HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\n{}";
    let response = request(addr, raw).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn test_auth_token_enforced() {
    let settings = HubSettings {
        auth_token: "secret".to_string(),
        ..HubSettings::default()
    };
    let (addr, _hub, _stop) = start_server(settings).await;

    let response = request(addr, &post("news", "{}", "")).await;
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let response = request(addr, &post("news", "{}", "Auth-Token: wrong\r\n")).await;
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let response = request(addr, &post("news", "{}", "Auth-Token:  secret \r\n")).await;
    assert!(response.starts_with("HTTP/1.1 201 Created\r\n"));

    let response = request(addr, "DELETE /news HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[tokio::test]
async fn test_token_sent_without_configured_token_rejected() {
    let (addr, _hub, _stop) = start_server(HubSettings::default()).await;
    let response = request(addr, "HEAD /news HTTP/1.1\r\nAuth-Token: abc\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[tokio::test]
async fn test_head_reports_stats() {
    let (addr, hub, _stop) = start_server(HubSettings::default()).await;
    let _a = open_stream(addr, "alpha").await;
    let _b = open_stream(addr, "beta").await;
    wait_for_count(&hub, "alpha", 1).await;
    wait_for_count(&hub, "beta", 1).await;

    let response = request(addr, "HEAD /all HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("x-consumer-count: 2\r\n"));
    assert!(response.contains("x-available-channels: [alpha,beta]\r\n"));
    assert!(response.contains("content-length: 0\r\n"));

    let response = request(addr, "HEAD /alpha HTTP/1.1\r\n\r\n").await;
    assert!(response.contains("x-consumer-count: 1\r\n"));
    assert!(response.contains("x-channel-exists: true\r\n"));

    let response = request(addr, "HEAD /gamma HTTP/1.1\r\n\r\n").await;
    assert!(response.contains("x-consumer-count: 0\r\n"));
    assert!(response.contains("x-channel-exists: false\r\n"));
}

#[tokio::test]
async fn test_delete_closes_channel() {
    let (addr, hub, _stop) = start_server(HubSettings::default()).await;
    let mut stream = open_stream(addr, "news").await;
    wait_for_count(&hub, "news", 1).await;

    let response = request(addr, "DELETE /news HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

    let mut buf = [0u8; 16];
    let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("subscriber connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(!hub.topic_exists("news").await.unwrap());
}

#[tokio::test]
async fn test_unknown_method_not_allowed() {
    let (addr, _hub, _stop) = start_server(HubSettings::default()).await;
    let response = request(addr, "PUT /news HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
}

#[tokio::test]
async fn test_requests_after_shutdown_unavailable() {
    let (addr, hub, _stop) = start_server(HubSettings::default()).await;
    hub.shutdown().await.unwrap();

    let response = request(addr, &post("news", "{}", "")).await;
    assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
}
