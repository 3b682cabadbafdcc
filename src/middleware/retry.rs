//! Naive bounded retry.

use tracing::warn;

use super::{ExecuteFuture, Interceptor, Next};
use crate::http::Request;

/// Re-runs the rest of the chain when it fails, up to `count` extra times.
///
/// Every error is treated alike: connectivity failures and (when a
/// [`StatusValidator`](super::StatusValidator) sits further in) bad statuses
/// are both retried. A success is returned immediately; after the last
/// attempt fails, its error is surfaced.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    count: usize,
}

impl Retry {
    /// Allows `count` attempts after the first.
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Interceptor for Retry {
    fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static> {
        let count = self.count;
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match next.clone().run(request.clone()).await {
                    Ok(response) => return Ok(response),
                    Err(e) if attempt < count => {
                        attempt += 1;
                        warn!(attempt, of = count, url = request.url(), error = %e, "retrying request");
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}
