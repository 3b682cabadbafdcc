//! A user directory backed entirely by mocks.
//!
//! Loads one page of users through a cached client, then fetches every
//! thumbnail through a `ThrottledCache` so at most four downloads run at once.
//! The second pass is served from storage.
//!
//! ```text
//! RUST_LOG=reqcache=debug cargo run --example user_directory
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqcache::cache::{AsyncCache, CacheConfig, StorageKind, ThrottledCache};
use reqcache::client::{Client, ClientConfig, ClientError};
use reqcache::http::{Response, StatusCode};
use reqcache::middleware::MockInterceptor;
use reqcache::transport::StaticTransport;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: u32,
    name: String,
    thumbnail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Page {
    results: Vec<User>,
}

fn mocks() -> Result<MockInterceptor, serde_json::Error> {
    let mocks = MockInterceptor::new();
    let names = ["ada", "grace", "edsger", "barbara", "ken", "dennis", "leslie", "tony"];
    let users: Vec<User> = names
        .iter()
        .enumerate()
        .map(|(i, name)| User {
            id: i as u32,
            name: (*name).to_owned(),
            thumbnail: format!("/thumbs/{i}.png"),
        })
        .collect();

    // Query order produced by the caller does not matter.
    mocks.add_data("/api?results=8&seed=998", &Page { results: users })?;
    mocks.add_any(|request| {
        let path = request.path().to_owned();
        Ok(Response::new(StatusCode::OK)
            .header("Content-Type", "image/png")
            .body(Bytes::from(path.into_bytes())))
    });
    Ok(mocks)
}

async fn load_thumbnails(
    client: &Client,
    thumbnails: &ThrottledCache<u32, Bytes>,
    users: &[User],
) -> usize {
    let lookups = users.iter().map(|user| {
        let client = client.clone();
        let path = user.thumbnail.clone();
        let thumbnails = thumbnails.clone();
        let id = user.id;
        tokio::spawn(async move {
            thumbnails
                .try_value(id, move || async move {
                    // Pretend the image takes a while to arrive.
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    client.get(path).data().await
                })
                .await
        })
    });

    let mut loaded = 0;
    for lookup in lookups.collect::<Vec<_>>() {
        if matches!(lookup.await, Ok(Some(_))) {
            loaded += 1;
        }
    }
    loaded
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::default()
        .base_url("https://randomuser.test")
        .retry_count(1)
        .header("Accept", "application/json");
    let client = Client::from_config(&config, StaticTransport::fail("network disabled"))?
        .wrap(mocks()?);

    let pages: AsyncCache<u32, Page> = AsyncCache::new(reqcache::cache::MemoryStorage::new());
    let page = {
        let client = client.clone();
        pages
            .try_value(998, move || async move {
                client
                    .get("/api")
                    .query("seed", "998")
                    .query("results", "8")
                    .json::<Page>()
                    .await
            })
            .await
            .ok_or_else(|| ClientError::Mock {
                message: "user page unavailable".into(),
            })?
    };
    info!(users = page.results.len(), "directory loaded");

    let thumbnails = ThrottledCache::from_config(
        &CacheConfig::default()
            .storage(StorageKind::MruArray)
            .max_size(32)
            .concurrency_limit(4),
    );

    let start = Instant::now();
    let loaded = load_thumbnails(&client, &thumbnails, &page.results).await;
    info!(loaded, elapsed_ms = start.elapsed().as_millis() as u64, "thumbnails fetched");

    let start = Instant::now();
    let loaded = load_thumbnails(&client, &thumbnails, &page.results).await;
    info!(loaded, elapsed_ms = start.elapsed().as_millis() as u64, "thumbnails from cache");

    for user in &page.results {
        let cached = thumbnails.current_value(&user.id).map_or(0, |b| b.len());
        info!(id = user.id, name = %user.name, thumbnail_bytes = cached, "user");
    }
    Ok(())
}
