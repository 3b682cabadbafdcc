//! Minimal HTTP/1.1 client transport over `tokio::net::TcpStream`.
//!
//! One connection per request with `Connection: close`. Bodies are framed by
//! `Content-Length`, or run to end-of-stream when the header is absent.
//! Chunked transfer encoding and TLS are not supported.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::{Position, Url};

use super::Transport;
use crate::client::ClientError;
use crate::http::{Request, Response, ResponseError};
use crate::middleware::{ExecuteFuture, ExecuteResult};

/// Largest response (head plus body) buffered before giving up (8 MiB).
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain `http://` transport.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use reqcache::client::Client;
/// use reqcache::transport::TcpTransport;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), reqcache::client::ClientError> {
/// let client = Client::new(TcpTransport::new().timeout(Duration::from_secs(5)))
///     .with_base_url("http://127.0.0.1:8080")?;
/// let body = client.get("/health").data().await?;
/// # let _ = body;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bounds the whole exchange: connect, write, and read.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(request: Request) -> ExecuteResult {
        let target = Target::parse(request.url())?;

        let mut stream = TcpStream::connect(&target.authority).await?;
        debug!(authority = %target.authority, path = %target.path, "connected");

        stream.write_all(&encode(&request, &target)).await?;
        stream.flush().await?;

        read_response(&mut stream).await
    }
}

impl Transport for TcpTransport {
    fn perform(&self, request: Request) -> ExecuteFuture<'_> {
        let timeout = self.timeout;
        Box::pin(async move {
            match tokio::time::timeout(timeout, Self::exchange(request)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(timeout)),
            }
        })
    }
}

// Where an absolute `http://` URL points.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    // `host:port`, always with a port.
    authority: String,
    // Value of the `Host` header: the authority as written.
    host: String,
    // Path and query, at least `/`.
    path: String,
}

impl Target {
    fn parse(raw: &str) -> Result<Self, ClientError> {
        let url = Url::parse(raw)?;
        let invalid = || ClientError::InvalidUrl {
            url: raw.to_owned(),
        };
        if url.scheme() != "http" {
            return Err(invalid());
        }

        let host = url.host_str().ok_or_else(invalid)?;
        let port = url.port_or_known_default().ok_or_else(invalid)?;

        Ok(Self {
            // `host_str` keeps the brackets of an IPv6 literal.
            authority: format!("{host}:{port}"),
            host: url[Position::BeforeHost..Position::AfterPort].to_owned(),
            path: url[Position::BeforePath..Position::AfterQuery].to_owned(),
        })
    }
}

fn encode(request: &Request, target: &Target) -> BytesMut {
    let body = request.body_bytes();
    let mut out = BytesMut::with_capacity(256 + body.map_or(0, |b| b.len()));

    out.put_slice(format!("{} {} HTTP/1.1\r\n", request.method(), target.path).as_bytes());
    out.put_slice(format!("Host: {}\r\n", target.host).as_bytes());
    out.put_slice(b"Connection: close\r\n");
    for (name, value) in request.headers().iter() {
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("connection")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        out.put_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if let Some(body) = body {
        out.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.put_slice(b"\r\n");
    if let Some(body) = body {
        out.put_slice(body);
    }
    out
}

async fn read_response(stream: &mut TcpStream) -> ExecuteResult {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    // Head first.
    let (response, body_offset) = loop {
        let bytes_read = stream.read_buf(&mut buf).await?;
        match Response::parse_head(&buf) {
            Ok(parsed) => break parsed,
            Err(ResponseError::Incomplete) if bytes_read == 0 => {
                return Err(ResponseError::Incomplete.into());
            }
            Err(ResponseError::Incomplete) => {}
            Err(e) => return Err(e.into()),
        }
        if buf.len() > MAX_RESPONSE_SIZE {
            return Err(too_large());
        }
    };

    // Then the body, framed by Content-Length or by end-of-stream.
    let expected = response.content_length();
    if let Some(length) = expected {
        if length > MAX_RESPONSE_SIZE.saturating_sub(body_offset) {
            return Err(too_large());
        }
    }
    loop {
        if let Some(length) = expected {
            if buf.len() >= body_offset + length {
                buf.truncate(body_offset + length);
                break;
            }
        }
        if stream.read_buf(&mut buf).await? == 0 {
            if expected.is_some() {
                return Err(ResponseError::Incomplete.into());
            }
            break;
        }
        if buf.len() > MAX_RESPONSE_SIZE {
            return Err(too_large());
        }
    }

    let body = buf.split_off(body_offset).freeze();
    debug!(status = %response.status(), body_bytes = body.len(), "response read");
    Ok(if body.is_empty() {
        response
    } else {
        response.body(body)
    })
}

fn too_large() -> ClientError {
    ResponseError::BodyTooLarge {
        max_bytes: MAX_RESPONSE_SIZE,
    }
    .into()
}
