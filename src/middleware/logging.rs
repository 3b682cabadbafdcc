//! Request/outcome logging.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ExecuteFuture, Interceptor, Next};
use crate::http::Request;

/// How much a [`Logging`] interceptor writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    None,
    /// One line per request and one per outcome.
    #[default]
    Debug,
    /// Adds headers and body sizes at `debug` level.
    Verbose,
}

/// Emits `tracing` events around each request. Never alters the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logging {
    mode: LogMode,
}

impl Logging {
    pub fn new(mode: LogMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }
}

impl Interceptor for Logging {
    fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static> {
        let mode = self.mode;
        if mode == LogMode::None {
            return Box::pin(next.run(request));
        }

        Box::pin(async move {
            let method = request.method().clone();
            let url = request.url().to_owned();
            info!(method = %method, url = %url, "REQ");
            if mode == LogMode::Verbose {
                debug!(
                    headers = %request.headers(),
                    body_bytes = request.body_bytes().map_or(0, |b| b.len()),
                    "request detail"
                );
            }

            let start = Instant::now();
            let result = next.run(request).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(response) => {
                    info!(method = %method, url = %url, status = %response.status(), elapsed_ms, "RES");
                    if mode == LogMode::Verbose {
                        debug!(
                            headers = %response.header_map(),
                            body_bytes = response.body_bytes().map_or(0, |b| b.len()),
                            "response detail"
                        );
                    }
                }
                Err(e) => {
                    info!(method = %method, url = %url, error = %e, elapsed_ms, "ERR");
                }
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientError};
    use crate::http::{Response, StatusCode};
    use crate::transport::StaticTransport;

    #[tokio::test]
    async fn passes_success_through_in_every_mode() {
        for mode in [LogMode::None, LogMode::Debug, LogMode::Verbose] {
            let client = Client::new(StaticTransport::respond(
                Response::new(StatusCode::OK).body("hi"),
            ))
            .wrap(Logging::new(mode));
            let response = client.execute(Request::get("/")).await.unwrap();
            assert_eq!(response.body_bytes().map(|b| b.as_ref()), Some(&b"hi"[..]));
        }
    }

    #[tokio::test]
    async fn passes_error_through() {
        let client =
            Client::new(StaticTransport::fail("unreachable")).wrap(Logging::new(LogMode::Verbose));
        let err = client.execute(Request::get("/")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
    }

    #[test]
    fn mode_deserializes_snake_case() {
        let mode: LogMode = serde_json::from_str(r#""verbose""#).unwrap();
        assert_eq!(mode, LogMode::Verbose);
        assert_eq!(Logging::default().mode(), LogMode::Debug);
    }
}
