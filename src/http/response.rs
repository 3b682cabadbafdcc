//! Response descriptor and HTTP/1.1 response-head parsing using [`httparse`].

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, StatusCode};

/// Errors that can occur while parsing an HTTP/1.1 response off the wire.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("response body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },
}

/// The `(body, status, headers)` triple produced by a transport or a mock.
///
/// The body is optional: a status-only mock or a `204` carries none.
///
/// # Examples
///
/// ```
/// use reqcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"results":[]}"#);
///
/// assert!(response.status().is_success());
/// assert_eq!(response.body_bytes().map(|b| b.len()), Some(14));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Option<Bytes>,
}

impl Response {
    /// Creates a new response with the given status and no body.
    pub fn new(status: impl Into<StatusCode>) -> Self {
        Self {
            status: status.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Sets a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Replaces all response headers.
    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header_map(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Consumes the response, returning its body.
    pub fn into_body(self) -> Option<Bytes> {
        self.body
    }

    /// Parses a response head from `buf`.
    ///
    /// Returns the response (without a body) and the byte offset at which the
    /// body begins in `buf` (immediately after the `\r\n\r\n` terminator).
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — more data is needed to complete the head.
    /// - [`ResponseError::Parse`] — the data is malformed.
    /// - [`ResponseError::MissingField`] — the status code is absent.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        const MAX_HEADERS: usize = 64;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;

        let mut header_map = Headers::new();
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.set(header.name, value);
            }
        }

        Ok((Response::new(code).headers(header_map), body_offset))
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}
