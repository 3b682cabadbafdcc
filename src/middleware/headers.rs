//! Default request headers.

use std::sync::{PoisonError, RwLock};

use super::{ExecuteFuture, Interceptor, Next};
use crate::http::{Headers, Request};

/// Adds configured headers to every request that does not already set them.
///
/// Headers can be changed after the client is built; look the interceptor up
/// with [`Client::interceptor`](crate::client::Client::interceptor).
#[derive(Debug, Default)]
pub struct HeaderInterceptor {
    headers: RwLock<Headers>,
}

impl HeaderInterceptor {
    pub fn new(headers: Headers) -> Self {
        Self {
            headers: RwLock::new(headers),
        }
    }

    pub fn add(&self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(name, value);
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Snapshot of the configured headers.
    pub fn headers(&self) -> Headers {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Interceptor for HeaderInterceptor {
    fn intercept(&self, mut request: Request, next: Next) -> ExecuteFuture<'static> {
        {
            let defaults = self.headers.read().unwrap_or_else(PoisonError::into_inner);
            let target = request.headers_mut();
            for (name, value) in defaults.iter() {
                if !target.contains(name) {
                    target.set(name, value);
                }
            }
        }
        Box::pin(next.run(request))
    }
}
