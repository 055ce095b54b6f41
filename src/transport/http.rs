use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue};
use http::response::Builder;
use http::{Method, Request, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::broker::{BROADCAST_TOPIC, Hub, HubStatus};
use crate::transport::request::{AUTH_TOKEN, channel, header_str, read_body, read_head};
use crate::utils::error::{HubError, TransportError};

const LINGER: Duration = Duration::from_secs(1);

const X_CONSUMER_COUNT: HeaderName = HeaderName::from_static("x-consumer-count");
const X_AVAILABLE_CHANNELS: HeaderName = HeaderName::from_static("x-available-channels");
const X_CHANNEL_EXISTS: HeaderName = HeaderName::from_static("x-channel-exists");

const SHUTTING_DOWN: &str = "Error: Service is shutting down.";

/// Binds `addr` and serves requests until `shutdown` resolves.
pub async fn start_http_server<F>(addr: &str, hub: Hub, shutdown: F) -> Result<(), TransportError>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(addr).await?;
    info!("Starting event source service on http://{}", addr);
    serve(listener, hub, shutdown).await
}

/// Accept loop over an already bound listener.
pub async fn serve<F>(listener: TcpListener, hub: Hub, shutdown: F) -> Result<(), TransportError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let hub = hub.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, hub).await {
                            debug!("Request from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    hub: Hub,
) -> Result<(), TransportError> {
    let (head, buffered) = match read_head(&mut stream).await {
        Ok(parsed) => parsed,
        Err(TransportError::Incomplete) => return Ok(()),
        Err(e) => {
            if let Ok(response) = error_response(StatusCode::BAD_REQUEST, "Error: Malformed request.") {
                let _ = respond(&mut stream, response).await;
            }
            return Err(e);
        }
    };

    let Some(channel) = channel(&head).map(str::to_string) else {
        error!("Client {} tried to reach invalid channel '{}'", peer, head.uri());
        let response = error_response(StatusCode::NOT_FOUND, "Error: Invalid channel name.")?;
        return respond(&mut stream, response).await;
    };

    if hub.status() == HubStatus::Retired {
        let response = error_response(StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN)?;
        return respond(&mut stream, response).await;
    }

    let response = match *head.method() {
        Method::GET => return subscribe(stream, peer, &hub, &channel).await,
        Method::POST => publish(&mut stream, peer, &hub, &head, buffered, &channel).await?,
        Method::DELETE => close(peer, &hub, &head, &channel).await?,
        Method::HEAD => information(peer, &hub, &head, &channel)
            .await?
            .map(|_| String::new()),
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "Error: Method not allowed.")?,
    };

    respond(&mut stream, response).await
}

/// Hands the connection over to a new subscriber.
async fn subscribe(
    mut stream: TcpStream,
    peer: SocketAddr,
    hub: &Hub,
    channel: &str,
) -> Result<(), TransportError> {
    if channel == BROADCAST_TOPIC {
        error!(
            "Subscribing client {} to global notification channel '{}' rejected",
            peer, BROADCAST_TOPIC
        );
        let message = format!(
            "Error: Channel '{BROADCAST_TOPIC}' is reserved for global notifications. Please choose another channel name."
        );
        let response = error_response(StatusCode::BAD_REQUEST, &message)?;
        return respond(&mut stream, response).await;
    }

    match hub.subscribe(stream, &peer.to_string(), channel).await {
        Ok(_) => Ok(()),
        Err(HubError::Connect(e)) => {
            error!("Subscribing client {} to channel '{}' failed: {}", peer, channel, e);
            Ok(())
        }
        Err(e) => {
            warn!("Subscribing client {} to channel '{}' failed: {}", peer, channel, e);
            Ok(())
        }
    }
}

async fn publish(
    stream: &mut TcpStream,
    peer: SocketAddr,
    hub: &Hub,
    head: &Request<()>,
    buffered: Vec<u8>,
    channel: &str,
) -> Result<Response<String>, TransportError> {
    if !authenticated(hub, head) {
        error!("Authentication of {} failed, publishing to channel rejected", peer);
        return Ok(error_response(
            StatusCode::FORBIDDEN,
            "Error: Authentication failed. Publishing to channel rejected.",
        )?);
    }

    if !valid_content_type(header_str(head.headers(), CONTENT_TYPE)) {
        error!("Invalid Content-Type sent by {}, expecting application/json", peer);
        return Ok(error_response(
            StatusCode::BAD_REQUEST,
            "Error: Invalid Content-Type. Expecting application/json.",
        )?);
    }

    let body = match read_body(stream, head, buffered).await {
        Ok(body) => body,
        Err(TransportError::BodyTooLarge(limit)) => {
            let message = format!("Error: Request body exceeds {limit} bytes.");
            return Ok(error_response(StatusCode::PAYLOAD_TOO_LARGE, &message)?);
        }
        Err(e) => return Err(e),
    };

    let response = match hub.publish(&body, channel).await {
        Ok(()) => Response::builder()
            .status(StatusCode::CREATED)
            .body(String::new())?,
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN)?,
    };
    Ok(response)
}

async fn close(
    peer: SocketAddr,
    hub: &Hub,
    head: &Request<()>,
    channel: &str,
) -> Result<Response<String>, http::Error> {
    if !authenticated(hub, head) {
        error!("Authentication of {} failed, closing of channel rejected", peer);
        return error_response(
            StatusCode::FORBIDDEN,
            "Error: Authentication failed. Closing of channel rejected.",
        );
    }

    match hub.close_topic(channel).await {
        Ok(()) => Response::builder().status(StatusCode::OK).body(String::new()),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN),
    }
}

async fn information(
    peer: SocketAddr,
    hub: &Hub,
    head: &Request<()>,
    channel: &str,
) -> Result<Response<String>, http::Error> {
    if !authenticated(hub, head) {
        error!("Authentication of {} failed, getting stats for channel rejected", peer);
        return error_response(
            StatusCode::FORBIDDEN,
            "Error: Authentication failed. Getting stats for channel rejected.",
        );
    }

    match stats(hub, channel).await {
        Ok(builder) => builder.body(String::new()),
        Err(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, SHUTTING_DOWN),
    }
}

async fn stats(hub: &Hub, channel: &str) -> Result<Builder, HubError> {
    let builder = Response::builder().status(StatusCode::OK);
    if channel == BROADCAST_TOPIC {
        let count = hub.subscriber_count_all().await?;
        let names = hub.topic_names().await?;
        Ok(builder
            .header(X_CONSUMER_COUNT, count)
            .header(X_AVAILABLE_CHANNELS, format!("[{}]", names.join(","))))
    } else {
        let count = hub.subscriber_count(channel).await?;
        let exists = hub.topic_exists(channel).await?;
        Ok(builder
            .header(X_CONSUMER_COUNT, count)
            .header(X_CHANNEL_EXISTS, exists.to_string()))
    }
}

/// Passes when no token is configured and none is sent, or when the sent
/// token equals the configured one.
fn authenticated(hub: &Hub, head: &Request<()>) -> bool {
    let expected = hub.settings().auth_token();
    let sent = header_str(head.headers(), AUTH_TOKEN)
        .map(str::trim)
        .unwrap_or_default();
    if expected.is_empty() && sent.is_empty() {
        return true;
    }
    !expected.is_empty() && sent == expected
}

fn valid_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| value.to_lowercase().contains("application/json"))
}

fn error_response(status: StatusCode, message: &str) -> Result<Response<String>, http::Error> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(format!("{message}\n"))
}

/// Serialises `response` as an HTTP/1.1 message that closes the connection.
fn encode(mut response: Response<String>) -> Vec<u8> {
    let length = response.body().len();
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    let status = response.status();
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_str(),
        status.canonical_reason().unwrap_or_default()
    )
    .into_bytes();
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(response.body().as_bytes());
    out
}

/// Writes `response` and closes the connection.
///
/// Unread request bytes are drained after the write side is shut down, so
/// the close does not reset the connection before the client has read the
/// response.
async fn respond(stream: &mut TcpStream, response: Response<String>) -> Result<(), TransportError> {
    stream.write_all(&encode(response)).await?;
    stream.flush().await?;
    stream.shutdown().await?;

    let mut sink = [0u8; 1024];
    let _ = time::timeout(LINGER, async {
        while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {}
    })
    .await;
    Ok(())
}
