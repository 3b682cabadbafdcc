//! Fluent request construction on top of [`Client::execute`].

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::{Url, form_urlencoded};

use super::{Client, ClientError};
use crate::http::{Request, Response};

/// A request being assembled. Created by [`Client::get`], [`Client::post`],
/// or [`Client::request`]; nothing is sent until [`send`](Self::send),
/// [`data`](Self::data), or [`json`](Self::json).
///
/// Query parameters are form-urlencoded and appended in the order given.
/// An encoding failure in [`json_body`](Self::json_body) is held back and
/// reported when the request is sent.
#[derive(Debug)]
pub struct RequestBuilder {
    client: Client,
    request: Request,
    query: Vec<(String, String)>,
    error: Option<ClientError>,
}

impl RequestBuilder {
    pub(super) fn new(client: Client, request: Request) -> Self {
        Self {
            client,
            request,
            query: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn query(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.query.push((name.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers_mut().set(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request = self.request.body(body);
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    #[must_use]
    pub fn json_body<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self = self.header("Content-Type", "application/json").body(body);
            }
            Err(e) => self.error = Some(ClientError::Encode(e)),
        }
        self
    }

    /// The request as it will be executed, resolved against the client's
    /// base URL when it has one.
    pub fn build(self) -> Result<Request, ClientError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut request = self.request;
        if let Some(url) = self.client.resolve(request.url())? {
            request.set_url(url);
        }
        if !self.query.is_empty() {
            let url = append_query(request.url(), &self.query);
            request.set_url(url);
        }
        Ok(request)
    }

    pub async fn send(self) -> Result<Response, ClientError> {
        let client = self.client.clone();
        let request = self.build()?;
        client.execute(request).await
    }

    /// Sends the request and returns its body, failing with
    /// [`ClientError::MissingBody`] when there is none.
    pub async fn data(self) -> Result<Bytes, ClientError> {
        self.send().await?.into_body().ok_or(ClientError::MissingBody)
    }

    /// Sends the request and decodes its body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let body = self.data().await?;
        serde_json::from_slice(&body).map_err(ClientError::Decode)
    }
}

// Relative URLs (no base configured) cannot be a `Url`, so their query is
// serialized on its own and appended.
fn append_query(url: &str, pairs: &[(String, String)]) -> String {
    let pairs = pairs.iter().map(|(name, value)| (name.as_str(), value.as_str()));
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().extend_pairs(pairs);
            parsed.into()
        }
        Err(_) => {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{url}{separator}{query}")
        }
    }
}
