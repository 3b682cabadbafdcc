//! Deterministic mock responses keyed by canonicalized path.
//!
//! URL builders do not guarantee query-parameter order, so both registration
//! and lookup go through [`search_paths`], which sorts the query tokens. A
//! mock registered for `/users?a=1&b=2` answers `/users?b=2&a=1` as well.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use super::{ExecuteFuture, ExecuteResult, Interceptor, Next};
use crate::client::ClientError;
use crate::http::{Request, Response, StatusCode};

/// Wildcard path: matches any request no more specific entry answers.
pub const ANY_PATH: &str = "*";

/// Produces the mocked outcome for a matched request.
pub type MockResponder = Arc<dyn Fn(&Request) -> ExecuteResult + Send + Sync>;

/// Candidate table keys for `url`, most specific first.
///
/// The `base` prefix is stripped, query tokens are sorted, and the list ends
/// with [`ANY_PATH`]:
///
/// ```
/// use reqcache::middleware::search_paths;
///
/// assert_eq!(
///     search_paths("http://api.test/users?seed=1&results=25", Some("http://api.test")),
///     ["/users?results=25&seed=1", "/users", "*"],
/// );
/// assert_eq!(search_paths("/users", None), ["/users", "*"]);
/// ```
pub fn search_paths(url: &str, base: Option<&str>) -> Vec<String> {
    if url == ANY_PATH {
        return vec![ANY_PATH.to_owned()];
    }

    let relative = base
        .map(|base| base.trim_end_matches('/'))
        .filter(|base| !base.is_empty())
        .and_then(|base| url.strip_prefix(base))
        .unwrap_or(url);

    let (path, query) = match relative.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (relative, None),
    };
    let path = if path.is_empty() { "/" } else { path };

    let mut paths = Vec::with_capacity(3);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        let mut tokens: Vec<&str> = query.split('&').filter(|t| !t.is_empty()).collect();
        tokens.sort_unstable();
        paths.push(format!("{path}?{}", tokens.join("&")));
    }
    paths.push(path.to_owned());
    paths.push(ANY_PATH.to_owned());
    paths
}

/// Answers matching requests from an in-memory table without calling the
/// rest of the chain. Requests nothing matches are delegated unchanged.
///
/// # Examples
///
/// ```
/// use reqcache::client::Client;
/// use reqcache::middleware::MockInterceptor;
/// use reqcache::transport::StaticTransport;
///
/// # #[tokio::main]
/// # async fn main() {
/// let mocks = MockInterceptor::new();
/// mocks.add_json("/api", r#"{"results":[]}"#);
///
/// let client = Client::new(StaticTransport::fail("offline")).wrap(mocks);
/// let body = client.get("/api").query("seed", "998").data().await.unwrap();
/// assert_eq!(&body[..], br#"{"results":[]}"#);
/// # }
/// ```
#[derive(Default)]
pub struct MockInterceptor {
    table: RwLock<HashMap<String, MockResponder>>,
    base_url: Option<String>,
}

impl std::fmt::Debug for MockInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInterceptor")
            .field("entries", &self.len())
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl MockInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strips `base_url` instead of the client's when computing search paths.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn key(&self, path: &str) -> String {
        search_paths(path, self.base_url.as_deref()).swap_remove(0)
    }

    /// Registers `responder` for `path`, replacing any previous entry.
    ///
    /// `path` is normally relative to the base URL. An absolute URL is
    /// matched as well, even when the client strips a base from requests.
    pub fn add<F>(&self, path: &str, responder: F)
    where
        F: Fn(&Request) -> ExecuteResult + Send + Sync + 'static,
    {
        let key = self.key(path);
        debug!(path = %key, "mock registered");
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(responder));
    }

    /// Registers `responder` as the wildcard fallback.
    pub fn add_any<F>(&self, responder: F)
    where
        F: Fn(&Request) -> ExecuteResult + Send + Sync + 'static,
    {
        self.add(ANY_PATH, responder);
    }

    /// Answers `path` with a clone of `response`.
    pub fn add_response(&self, path: &str, response: Response) {
        self.add(path, move |_| Ok(response.clone()));
    }

    /// Answers `path` with `200 OK` and a raw JSON body.
    pub fn add_json(&self, path: &str, json: impl Into<Bytes>) {
        self.add_response(
            path,
            Response::new(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(json),
        );
    }

    /// Answers `path` with `200 OK` and `value` encoded as JSON.
    pub fn add_data<T: Serialize>(&self, path: &str, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.add_json(path, body);
        Ok(())
    }

    /// Answers `path` with an empty response carrying `status`.
    pub fn add_status(&self, path: &str, status: impl Into<StatusCode>) {
        self.add_response(path, Response::new(status));
    }

    /// Fails `path` with [`ClientError::Mock`].
    pub fn add_error(&self, path: &str, message: impl Into<String>) {
        let message = message.into();
        self.add(path, move |_| {
            Err(ClientError::Mock {
                message: message.clone(),
            })
        });
    }

    pub fn remove(&self, path: &str) -> bool {
        let key = self.key(path);
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
            .is_some()
    }

    pub fn reset(&self) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // First responder matching `url`, most specific candidate first.
    fn find(&self, url: &str, base: Option<&str>) -> Option<(String, MockResponder)> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        if table.is_empty() {
            return None;
        }
        let base = self.base_url.as_deref().or(base);
        let mut paths = search_paths(url, base);
        if base.is_some() {
            // Entries registered with an absolute URL keep their base.
            let wildcard = paths.pop();
            for path in search_paths(url, None) {
                if path != ANY_PATH && !paths.contains(&path) {
                    paths.push(path);
                }
            }
            paths.extend(wildcard);
        }
        paths.into_iter().find_map(|path| {
            let responder = table.get(&path).cloned()?;
            Some((path, responder))
        })
    }
}

impl Interceptor for MockInterceptor {
    fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static> {
        match self.find(request.url(), next.base_url()) {
            Some((path, responder)) => {
                debug!(url = request.url(), matched = %path, "serving mock");
                let result = responder(&request);
                Box::pin(async move { result })
            }
            None => Box::pin(next.run(request)),
        }
    }
}
