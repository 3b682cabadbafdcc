//! Status-code validation.

use tracing::debug;

use super::{ExecuteFuture, Interceptor, Next};
use crate::client::ClientError;
use crate::http::Request;

/// Rejects any response whose status is outside `200..=299`.
///
/// The body of a rejected response is discarded; the caller receives
/// [`ClientError::Status`] carrying the status code. Successful responses
/// pass through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusValidator;

impl StatusValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Interceptor for StatusValidator {
    fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static> {
        Box::pin(async move {
            let response = next.run(request).await?;
            let status = response.status();
            if !status.is_success() {
                debug!(status = %status, "rejecting unsuccessful response");
                return Err(ClientError::Status { status });
            }
            Ok(response)
        })
    }
}
