//! # reqcache
//!
//! Request-level data caching for async Rust: a coalescing cache that runs at
//! most one fetch per key, an admission controller that bounds how many
//! fetches run at once, and a composable interceptor chain for executing the
//! HTTP requests those fetches make.
//!
//! ## Quick Start
//!
//! ```rust
//! use reqcache::cache::{MruMapStorage, ThrottledCache};
//! use reqcache::client::Client;
//! use reqcache::middleware::{MockInterceptor, StatusValidator};
//! use reqcache::transport::StaticTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mocks = MockInterceptor::new();
//!     mocks.add_json("/avatar/7", "[7,7,7]");
//!
//!     let client = Client::new(StaticTransport::fail("offline"))
//!         .with_base_url("https://img.example.test")?
//!         .wrap(StatusValidator::new())
//!         .wrap(mocks);
//!
//!     let avatars = ThrottledCache::new(MruMapStorage::new(64, 10), 4);
//!     let fetch_client = client.clone();
//!     let avatar = avatars
//!         .try_value(7u32, move || async move {
//!             fetch_client.get("/avatar/7").json::<Vec<u8>>().await
//!         })
//!         .await;
//!
//!     assert_eq!(avatar, Some(vec![7, 7, 7]));
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod cache;
pub mod client;
pub mod http;
pub mod middleware;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use admission::{AdmissionController, AdmissionPermit};
pub use cache::{AsyncCache, Cache, CacheConfig, FailurePolicy, ThrottledCache};
pub use client::{Client, ClientConfig, ClientError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::{Interceptor, Next};
pub use transport::{TcpTransport, Transport};
