//! The root of every chain: something that actually performs a request.
//!
//! [`TcpTransport`] speaks plain HTTP/1.1. [`StaticTransport`] and
//! [`from_fn`] are in-process stand-ins for tests and demos.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::client::ClientError;
use crate::http::{Request, Response};
use crate::middleware::{ExecuteFuture, ExecuteResult};

mod tcp;

pub use tcp::TcpTransport;

/// Performs a request and yields `(status, headers, body)`, or fails on a
/// connection-level problem. Status codes are never interpreted here.
pub trait Transport: Send + Sync {
    fn perform(&self, request: Request) -> ExecuteFuture<'_>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn perform(&self, request: Request) -> ExecuteFuture<'_> {
        (**self).perform(request)
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Respond(Response),
    Fail(String),
}

/// Answers every request with the same response or the same failure, and
/// counts how often it was asked.
#[derive(Debug)]
pub struct StaticTransport {
    outcome: Outcome,
    calls: AtomicUsize,
}

impl StaticTransport {
    pub fn respond(response: Response) -> Self {
        Self {
            outcome: Outcome::Respond(response),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every request with [`ClientError::Transport`].
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of requests performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for StaticTransport {
    fn perform(&self, _request: Request) -> ExecuteFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = match &self.outcome {
            Outcome::Respond(response) => Ok(response.clone()),
            Outcome::Fail(message) => Err(ClientError::Transport {
                message: message.clone(),
            }),
        };
        Box::pin(async move { result })
    }
}

/// A transport backed by a closure. See [`from_fn`].
pub struct FnTransport<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}

/// Wraps `f` as a [`Transport`].
///
/// ```
/// use reqcache::http::{Response, StatusCode};
/// use reqcache::transport::from_fn;
///
/// let transport = from_fn(|request| async move {
///     Ok(Response::new(StatusCode::OK).body(request.url().to_owned()))
/// });
/// # let _ = transport;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = ExecuteResult> + Send + 'static,
{
    FnTransport { f }
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = ExecuteResult> + Send + 'static,
{
    fn perform(&self, request: Request) -> ExecuteFuture<'_> {
        Box::pin((self.f)(request))
    }
}
