//! Request-head parsing for the HTTP front end.

use http::header::{AsHeaderName, CONTENT_LENGTH, HeaderName};
use http::{HeaderMap, Request, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::utils::error::TransportError;

/// Upper bound for the request line plus headers.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Upper bound for a publish body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const MAX_HEADERS: usize = 64;

/// Header carrying the publisher's token.
pub const AUTH_TOKEN: HeaderName = HeaderName::from_static("auth-token");

/// The channel addressed by the request path, if the path is a single
/// segment of `[a-z0-9-_]` characters.
pub fn channel<B>(request: &Request<B>) -> Option<&str> {
    channel_from_path(request.uri().path())
}

/// A header value as text; values that are not visible ASCII count as absent.
pub fn header_str<'a, K>(headers: &'a HeaderMap, name: K) -> Option<&'a str>
where
    K: AsHeaderName,
{
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub fn content_length(headers: &HeaderMap) -> Option<usize> {
    header_str(headers, CONTENT_LENGTH).and_then(|value| value.trim().parse().ok())
}

pub fn channel_from_path(path: &str) -> Option<&str> {
    let path = path.split('?').next().unwrap_or_default();
    let channel = path.strip_prefix('/')?;
    let valid = !channel.is_empty()
        && channel
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
    valid.then_some(channel)
}

/// Reads and parses a request head from `stream`.
///
/// Returns the head together with any body bytes that arrived in the same
/// reads.
pub async fn read_head<R>(stream: &mut R) -> Result<(Request<()>, Vec<u8>), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Incomplete);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&buf)? {
            httparse::Status::Complete(len) => {
                let version = match request.version {
                    Some(0) => Version::HTTP_10,
                    _ => Version::HTTP_11,
                };
                let mut builder = Request::builder()
                    .method(request.method.unwrap_or_default())
                    .uri(request.path.unwrap_or_default())
                    .version(version);
                for header in request.headers.iter() {
                    builder = builder.header(header.name, header.value);
                }
                let head = builder.body(())?;
                return Ok((head, buf.split_off(len)));
            }
            httparse::Status::Partial if buf.len() >= MAX_HEAD_BYTES => {
                return Err(TransportError::HeadTooLarge(MAX_HEAD_BYTES));
            }
            httparse::Status::Partial => {}
        }
    }
}

/// Reads a `Content-Length` delimited body, starting from the bytes already
/// buffered while reading the head.
pub async fn read_body<R>(
    stream: &mut R,
    head: &Request<()>,
    mut buffered: Vec<u8>,
) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let Some(len) = content_length(head.headers()) else {
        return Ok(Vec::new());
    };
    if len > MAX_BODY_BYTES {
        return Err(TransportError::BodyTooLarge(MAX_BODY_BYTES));
    }

    if buffered.len() >= len {
        buffered.truncate(len);
        return Ok(buffered);
    }

    let already = buffered.len();
    buffered.resize(len, 0);
    stream
        .read_exact(&mut buffered[already..])
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::Incomplete,
            _ => TransportError::Io(e),
        })?;
    Ok(buffered)
}
