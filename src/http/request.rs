//! Outgoing request descriptor.

use bytes::Bytes;

use super::{Headers, Method};

/// A request as it travels through the interceptor chain.
///
/// The URL is kept as the string the caller built (absolute, or relative to
/// the client's base URL). Requests are cheap to clone, since the body is a
/// reference-counted [`Bytes`] buffer; the retry interceptor relies on this
/// to replay a request.
///
/// # Examples
///
/// ```
/// use reqcache::http::{Method, Request};
///
/// let request = Request::get("https://api.example.com/users?results=25")
///     .header("Accept", "application/json");
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "https://api.example.com/users");
/// assert_eq!(request.query_string(), Some("results=25"));
/// assert_eq!(request.headers().get("accept"), Some("application/json"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: Headers,
    body: Option<Bytes>,
}

impl Request {
    /// Creates a request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Sets a request header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the full URL, including any query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Replaces the URL, e.g. after resolving it against a base.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    /// Returns the URL without its query string.
    pub fn path(&self) -> &str {
        match self.url.find('?') {
            Some(pos) => &self.url[..pos],
            None => &self.url,
        }
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.url.find('?').map(|pos| &self.url[pos + 1..])
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access for interceptors that decorate outgoing requests.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let req = Request::get("/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
    }

    #[test]
    fn no_query_string() {
        let req = Request::get("/users");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.query_string(), None);
    }

    #[test]
    fn clone_shares_body() {
        let req = Request::new(Method::Post, "/submit").body("hello");
        let copy = req.clone();
        assert_eq!(copy.body_bytes().map(|b| b.as_ref()), Some(&b"hello"[..]));
    }
}
