//! End-to-end scenarios: client chain, caches, and the TCP transport together.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqcache::cache::{AsyncCache, MemoryStorage, ThrottledCache};
use reqcache::client::{Client, ClientConfig, ClientError};
use reqcache::http::{Request, Response, StatusCode};
use reqcache::middleware::{LogMode, MockInterceptor, Retry, StatusValidator};
use reqcache::transport::{StaticTransport, TcpTransport, from_fn};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[derive(Debug, Deserialize)]
struct UserPage {
    results: Vec<serde_json::Value>,
}

#[tokio::test]
async fn mock_answers_shuffled_query_without_transport() {
    let transport = Arc::new(StaticTransport::fail("network disabled"));
    let mocks = MockInterceptor::new();
    mocks.add_json("/api", r#"{"results":[]}"#);

    let client = Client::from_config(
        &ClientConfig::default().base_url("https://randomuser.test"),
        Arc::clone(&transport),
    )
    .unwrap()
    .wrap(mocks);

    let page: UserPage = client
        .get("/api")
        .query("seed", "998")
        .query("results", "25")
        .json()
        .await
        .unwrap();

    assert!(page.results.is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn exact_query_mock_wins_over_bare_path() {
    let mocks = MockInterceptor::new();
    mocks.add_json("/api?a=1&b=2", "1");
    mocks.add_json("/api", "2");
    let client = Client::new(StaticTransport::fail("offline")).wrap(mocks);

    let specific: u8 = client.get("/api?b=2&a=1").json().await.unwrap();
    let general: u8 = client.get("/api?a=1").json().await.unwrap();
    assert_eq!((specific, general), (1, 2));
}

#[tokio::test]
async fn retry_two_succeeds_on_third_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let transport = from_fn(move |_request: Request| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call < 2 {
                Err(ClientError::Transport {
                    message: "connection reset".into(),
                })
            } else {
                Ok(Response::new(StatusCode::OK).body("ok"))
            }
        }
    });

    let config = ClientConfig::default().retry_count(2).log_mode(LogMode::Verbose);
    let client = Client::from_config(&config, transport).unwrap();
    let body = client.get("http://h.test/").data().await.unwrap();

    assert_eq!(&body[..], b"ok");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_also_covers_bad_statuses() {
    let transport = Arc::new(StaticTransport::respond(Response::new(
        StatusCode::SERVICE_UNAVAILABLE,
    )));
    let client = Client::new(Arc::clone(&transport))
        .wrap(StatusValidator::new())
        .wrap(Retry::new(2));

    let err = client.get("/").send().await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_request() {
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = {
        let release = Arc::clone(&release);
        let calls = Arc::clone(&calls);
        from_fn(move |_request: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            let release = Arc::clone(&release);
            async move {
                release.notified().await;
                Ok(Response::new(StatusCode::OK).body(r#"{"results":[{},{}]}"#))
            }
        })
    };
    let client = Client::new(transport).wrap(StatusValidator::new());
    let cache: AsyncCache<String, usize> = AsyncCache::new(MemoryStorage::new());

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let client = client.clone();
            tokio::spawn(async move {
                cache
                    .try_value("users".to_string(), move || async move {
                        let page: UserPage = client.get("/users").json().await?;
                        Ok::<_, ClientError>(page.results.len())
                    })
                    .await
            })
        })
        .collect();

    while cache.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    // Give the remaining callers a chance to join before the fetch settles.
    tokio::time::sleep(Duration::from_millis(20)).await;
    release.notify_one();

    for caller in callers {
        assert_eq!(caller.await.unwrap(), Some(2));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.current_value(&"users".to_string()), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn throttled_cache_bounds_concurrent_requests() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let transport = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        from_fn(move |request: Request| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Response::new(StatusCode::OK).body(request.path().to_owned()))
            }
        })
    };
    let client = Client::new(transport);
    let thumbnails: ThrottledCache<u32, bytes::Bytes> =
        ThrottledCache::new(MemoryStorage::new(), 3);

    let callers: Vec<_> = (0..15u32)
        .map(|id| {
            let thumbnails = thumbnails.clone();
            let client = client.clone();
            tokio::spawn(async move {
                thumbnails
                    .try_value(id, move || async move {
                        client.get(format!("/thumb/{id}")).data().await
                    })
                    .await
            })
        })
        .collect();

    for (id, caller) in callers.into_iter().enumerate() {
        let body = caller.await.unwrap().unwrap();
        assert_eq!(&body[..], format!("/thumb/{id}").as_bytes());
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(thumbnails.admission().in_use(), 0);
}

#[tokio::test]
async fn failed_request_is_not_cached() {
    let mocks = MockInterceptor::new();
    mocks.add_status("/flaky", StatusCode::BAD_GATEWAY);
    let client = Client::new(StaticTransport::fail("offline"))
        .wrap(StatusValidator::new())
        .wrap(mocks);
    let cache: AsyncCache<&'static str, bytes::Bytes> = AsyncCache::new(MemoryStorage::new());

    let fetch = |client: Client| move || async move { client.get("/flaky").data().await };
    assert_eq!(cache.try_value("flaky", fetch(client.clone())).await, None);
    assert!(cache.is_empty());

    // Once the upstream recovers, the next call fetches again.
    let mocks = client.interceptor::<MockInterceptor>().unwrap();
    mocks.add_json("/flaky", "fine");
    assert_eq!(
        cache.try_value("flaky", fetch(client.clone())).await.as_deref(),
        Some(&b"fine"[..])
    );
}

#[tokio::test]
async fn tcp_transport_through_full_chain() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = bytes::BytesMut::new();
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            if stream.read_buf(&mut buf).await.unwrap() == 0 {
                break;
            }
        }
        let body = br#"{"results":[{"name":"ada"}]}"#;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    });

    let config = ClientConfig::default()
        .base_url(format!("http://{addr}"))
        .header("Accept", "application/json");
    let client =
        Client::from_config(&config, TcpTransport::new().timeout(Duration::from_secs(5))).unwrap();

    let page: UserPage = client.get("/api").query("results", "1").json().await.unwrap();
    assert_eq!(page.results.len(), 1);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /api?results=1 HTTP/1.1\r\n"));
    assert!(request.contains("Accept: application/json\r\n"));
}
