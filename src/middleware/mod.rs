//! Interceptor chain — composable request executors in front of a transport.
//!
//! A [`Client`](crate::client::Client) owns an ordered list of interceptors,
//! outermost first, and a [`Transport`] at the root. Executing a request walks
//! the list with a [`Next`] cursor: each interceptor may
//!
//! - **pass through** — call `next.run(request).await` unchanged,
//! - **short-circuit** — return a response or error without calling `next`,
//! - **decorate** — edit the request before, or inspect the result after,
//!   delegating.
//!
//! When the cursor runs past the last interceptor the request reaches the
//! transport.
//!
//! ## Built-in interceptors
//!
//! | Interceptor           | Behaviour                                                    |
//! |-----------------------|--------------------------------------------------------------|
//! | [`StatusValidator`]   | Turns a non-2xx status into [`ClientError::Status`].          |
//! | [`Retry`]             | Re-runs the rest of the chain up to `count` more times.      |
//! | [`Logging`]           | Emits `tracing` events; never alters the outcome.            |
//! | [`MockInterceptor`]   | Answers from a table keyed by canonicalized path.            |
//! | [`HeaderInterceptor`] | Adds configured headers the request does not already carry.  |
//!
//! Order matters. With a mock placed outside the status validator, mocked
//! error statuses are returned as-is; placed inside, they are rejected.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use url::Url;

use crate::client::ClientError;
use crate::http::{Request, Response};
use crate::transport::Transport;

pub mod headers;
pub mod logging;
pub mod mock;
pub mod retry;
pub mod status;

pub use headers::HeaderInterceptor;
pub use logging::{LogMode, Logging};
pub use mock::{ANY_PATH, MockInterceptor, MockResponder, search_paths};
pub use retry::Retry;
pub use status::StatusValidator;

/// Result of executing a request through (part of) the chain.
pub type ExecuteResult = Result<Response, ClientError>;

/// Boxed, `Send` future returned by interceptors and transports.
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = ExecuteResult> + Send + 'a>>;

/// Upcast helper so a configured interceptor can be found again by type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The core trait for every link in the chain.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; one chain is shared by every
///   task that executes requests through the client.
/// - The returned future is `'static`: copy whatever configuration it needs
///   out of `&self` before boxing it.
/// - Interceptors never mutate each other. Runtime reconfiguration (such as
///   adding mocks) goes through interior mutability on the interceptor itself.
pub trait Interceptor: AsAny + Send + Sync {
    /// Handle `request`, optionally delegating to the rest of the chain.
    fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static>;
}

// Everything a `Next` cursor walks over. Built once, then shared read-only.
#[derive(Clone)]
pub(crate) struct Chain {
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) base_url: Option<Url>,
}

impl Chain {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            interceptors: Vec::new(),
            transport,
            base_url: None,
        }
    }

    /// Finds the outermost interceptor of type `I`.
    pub(crate) fn find<I: Interceptor + 'static>(&self) -> Option<&I> {
        self.interceptors.iter().find_map(|interceptor| {
            let interceptor: &dyn Interceptor = &**interceptor;
            interceptor.as_any().downcast_ref::<I>()
        })
    }
}

/// A cursor into the remaining chain for a single request.
///
/// `Next` is cheap to clone, which is what lets [`Retry`] run the rest of the
/// chain more than once.
///
/// # Examples
///
/// ```rust,no_run
/// use reqcache::http::Request;
/// use reqcache::middleware::{ExecuteFuture, Interceptor, Next};
///
/// struct PassThrough;
///
/// impl Interceptor for PassThrough {
///     fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static> {
///         Box::pin(next.run(request))
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Next {
    chain: Arc<Chain>,
    // Which interceptor to invoke on the next `run` call.
    index: usize,
}

impl Next {
    pub(crate) fn new(chain: Arc<Chain>) -> Self {
        Self { chain, index: 0 }
    }

    /// The client's base URL, used to relativize request URLs.
    pub fn base_url(&self) -> Option<&str> {
        self.chain.base_url.as_ref().map(Url::as_str)
    }

    /// Invokes the next interceptor, or the transport once the list is exhausted.
    pub async fn run(mut self, request: Request) -> ExecuteResult {
        match self.chain.interceptors.get(self.index).cloned() {
            Some(interceptor) => {
                self.index += 1;
                interceptor.intercept(request, self).await
            }
            None => self.chain.transport.perform(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::http::StatusCode;
    use crate::transport::StaticTransport;

    // Records its name on the way in, then delegates.
    struct Tag {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Interceptor for Tag {
        fn intercept(&self, request: Request, next: Next) -> ExecuteFuture<'static> {
            self.seen.lock().unwrap().push(self.name);
            Box::pin(next.run(request))
        }
    }

    struct ShortCircuit;

    impl Interceptor for ShortCircuit {
        fn intercept(&self, _request: Request, _next: Next) -> ExecuteFuture<'static> {
            Box::pin(async { Ok(Response::new(StatusCode::CREATED)) })
        }
    }

    fn chain(
        interceptors: Vec<Arc<dyn Interceptor>>,
        transport: Arc<StaticTransport>,
    ) -> Arc<Chain> {
        let mut chain = Chain::new(transport);
        chain.interceptors = interceptors;
        Arc::new(chain)
    }

    #[tokio::test]
    async fn empty_chain_reaches_transport() {
        let transport = Arc::new(StaticTransport::respond(Response::new(StatusCode::OK)));
        let next = Next::new(chain(vec![], Arc::clone(&transport)));
        let response = next.run(Request::get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn interceptors_run_outermost_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(StaticTransport::respond(Response::new(StatusCode::OK)));
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(Tag {
                name: "outer",
                seen: Arc::clone(&seen),
            }),
            Arc::new(Tag {
                name: "inner",
                seen: Arc::clone(&seen),
            }),
        ];
        let next = Next::new(chain(interceptors, Arc::clone(&transport)));

        next.run(Request::get("/")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_transport() {
        let transport = Arc::new(StaticTransport::respond(Response::new(StatusCode::OK)));
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(ShortCircuit)];
        let next = Next::new(chain(interceptors, Arc::clone(&transport)));
        let response = next.run(Request::get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn find_downcasts_by_type() {
        let transport = Arc::new(StaticTransport::respond(Response::new(StatusCode::OK)));
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(ShortCircuit), Arc::new(Retry::new(2))];
        let chain = chain(interceptors, transport);
        assert_eq!(chain.find::<Retry>().map(Retry::count), Some(2));
        assert!(chain.find::<StatusValidator>().is_none());
    }
}
