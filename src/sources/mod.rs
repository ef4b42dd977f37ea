pub mod hackernews;
pub mod rss;

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::warn;
use uuid::Uuid;

use crate::types::{FetchedArticle, Result};

pub use hackernews::HackerNewsSource;
pub use rss::RssSource;

/// A pollable upstream producing recent articles. `source_key` is the
/// stable store identity; `fetch_latest` stamps the given source id on
/// every item it returns.
#[async_trait]
pub trait NewsSource: Send + Sync {
    fn source_key(&self) -> &str;

    fn source_name(&self) -> &str;

    fn source_url(&self) -> &str;

    fn default_language(&self) -> &str {
        "en"
    }

    async fn fetch_latest(&self, source_id: Uuid, limit: usize) -> Result<Vec<FetchedArticle>>;
}

pub(crate) fn fetch_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..Default::default()
    }
}

/// Issue a GET with retries, returning the response body as text.
pub(crate) async fn get_text_with_retry(client: &reqwest::Client, url: &str) -> Result<String> {
    let mut backoff = fetch_backoff();
    loop {
        match client.get(url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => return Ok(resp.text().await?),
                Err(e) => match backoff.next_backoff() {
                    Some(delay) => {
                        warn!("GET {} returned {}, retrying", url, e);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e.into()),
                },
            },
            Err(e) => match backoff.next_backoff() {
                Some(delay) => {
                    warn!("GET {} failed: {}, retrying", url, e);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e.into()),
            },
        }
    }
}
