//! The request executor: an interceptor chain over a transport.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::http::{Method, Request, ResponseError, StatusCode};
use crate::middleware::{
    Chain, ExecuteResult, HeaderInterceptor, Interceptor, Logging, Next, Retry, StatusValidator,
};
use crate::transport::Transport;

mod builder;
mod config;

pub use builder::RequestBuilder;
pub use config::ClientConfig;

/// Everything that can go wrong executing a request.
///
/// A missing cache value is not an error; caches report it as `None`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("bad response status: {status}")]
    Status { status: StatusCode },

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("mock error: {message}")]
    Mock { message: String },

    #[error("response has no body")]
    MissingBody,

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed response: {0}")]
    Parse(#[from] ResponseError),
}

impl ClientError {
    /// The offending status, for [`ClientError::Status`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure happened below HTTP: connecting, reading, or
    /// waiting for the peer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_) | Self::Timeout(_))
    }
}

/// Executes requests through a chain of [`Interceptor`]s ending in a
/// [`Transport`].
///
/// Cloning is cheap; clones share the chain. [`wrap`](Self::wrap) and
/// [`with_base_url`](Self::with_base_url) are meant for setup: applied to a
/// clone, they leave the original untouched.
///
/// # Examples
///
/// ```
/// use reqcache::client::Client;
/// use reqcache::http::{Response, StatusCode};
/// use reqcache::middleware::{Retry, StatusValidator};
/// use reqcache::transport::StaticTransport;
///
/// # #[tokio::main]
/// # async fn main() {
/// let client = Client::new(StaticTransport::respond(Response::new(StatusCode::OK)))
///     .with_base_url("https://api.example.test")
///     .unwrap()
///     .wrap(StatusValidator::new())
///     .wrap(Retry::new(2)); // outermost
///
/// let response = client.get("/users").send().await.unwrap();
/// assert_eq!(response.status(), StatusCode::OK);
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    chain: Arc<Chain>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.chain.base_url)
            .field("interceptors", &self.chain.interceptors.len())
            .finish()
    }
}

impl Client {
    /// A client with no interceptors.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            chain: Arc::new(Chain::new(Arc::new(transport))),
        }
    }

    /// Builds the standard chain, outermost first:
    /// headers, logging, retry, status validation, transport.
    ///
    /// Retry is omitted when `retry_count` is zero, status validation when
    /// `validate_status` is off.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Url`] if `base_url` does not parse.
    pub fn from_config(
        config: &ClientConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self, ClientError> {
        let mut client = Self::new(transport);
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url)?;
        }
        if config.validate_status {
            client = client.wrap(StatusValidator::new());
        }
        if config.retry_count > 0 {
            client = client.wrap(Retry::new(config.retry_count));
        }
        Ok(client
            .wrap(Logging::new(config.log_mode))
            .wrap(HeaderInterceptor::new(config.headers.iter().collect())))
    }

    /// Sets the base URL relative request URLs are resolved against.
    ///
    /// The base is treated as a directory: `http://h/v1` and `http://h/v1/`
    /// both resolve `/users` to `http://h/v1/users`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Url`] if `base_url` is not an absolute URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Arc::make_mut(&mut self.chain).base_url = Some(base);
        Ok(self)
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.chain.base_url.as_ref()
    }

    /// Adds `interceptor` as the new outermost link.
    #[must_use]
    pub fn wrap(mut self, interceptor: impl Interceptor + 'static) -> Self {
        Arc::make_mut(&mut self.chain)
            .interceptors
            .insert(0, Arc::new(interceptor));
        self
    }

    /// Finds the outermost interceptor of type `I`, e.g. to add mocks after
    /// the client is built.
    pub fn interceptor<I: Interceptor + 'static>(&self) -> Option<&I> {
        self.chain.find::<I>()
    }

    /// Runs `request` through the chain. A relative URL is first resolved
    /// against the base URL.
    pub async fn execute(&self, mut request: Request) -> ExecuteResult {
        if let Some(url) = self.resolve(request.url())? {
            request.set_url(url);
        }
        Next::new(Arc::clone(&self.chain)).run(request).await
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder {
        self.request(Method::Get, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder {
        self.request(Method::Post, path)
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Request::new(method, path))
    }

    // `None` when the URL is already absolute or there is no base.
    fn resolve(&self, url: &str) -> Result<Option<String>, ClientError> {
        let Some(base) = self.base_url() else {
            return Ok(None);
        };
        match Url::parse(url) {
            Ok(_) => Ok(None),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(Some(base.join(url.trim_start_matches('/'))?.into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
