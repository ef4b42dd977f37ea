use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{get_text_with_retry, NewsSource};
use crate::types::{FetchedArticle, PipelineError, Result};

const DEFAULT_API_BASE: &str = "https://hacker-news.firebaseio.com/v0";
const DEFAULT_WEB_BASE: &str = "https://news.ycombinator.com";

#[derive(Debug, Deserialize)]
struct HnItem {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

/// Hacker News connector over the Firebase JSON API: newstories list,
/// then one item lookup per id.
pub struct HackerNewsSource {
    client: reqwest::Client,
    api_base: String,
    web_base: String,
}

impl HackerNewsSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
        }
    }

    pub fn with_api_base(
        mut self,
        api_base: impl Into<String>,
        web_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into();
        self.web_base = web_base.into();
        self
    }

    async fn fetch_item(&self, id: u64) -> Result<Option<HnItem>> {
        let url = format!("{}/item/{}.json", self.api_base, id);
        let body = get_text_with_retry(&self.client, &url).await?;
        if body.trim() == "null" {
            return Ok(None);
        }
        let item: HnItem = serde_json::from_str(&body)?;
        Ok(Some(item))
    }
}

fn item_fetched_at(time: Option<i64>) -> DateTime<Utc> {
    time.and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl NewsSource for HackerNewsSource {
    fn source_key(&self) -> &str {
        "hackernews"
    }

    fn source_name(&self) -> &str {
        "Hacker News"
    }

    fn source_url(&self) -> &str {
        &self.web_base
    }

    async fn fetch_latest(&self, source_id: Uuid, limit: usize) -> Result<Vec<FetchedArticle>> {
        let url = format!("{}/newstories.json", self.api_base);
        let body = get_text_with_retry(&self.client, &url).await?;
        let ids: Vec<u64> = serde_json::from_str(&body)?;

        let mut articles = Vec::new();
        for id in ids.into_iter().take(limit) {
            let item = match self.fetch_item(id).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                // One bad item must not sink the whole poll.
                Err(e) => {
                    warn!("Failed to fetch HN item {}: {}", id, e);
                    continue;
                }
            };
            if item.dead || item.deleted {
                continue;
            }
            if item.kind.as_deref() != Some("story") {
                debug!("Skipping HN item {} of type {:?}", id, item.kind);
                continue;
            }
            let title = match item.title {
                Some(t) if !t.is_empty() => t,
                _ => continue,
            };
            let url = item
                .url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| format!("{}/item?id={}", self.web_base, item.id));
            if url::Url::parse(&url).is_err() {
                return Err(PipelineError::InvalidUrl(url));
            }
            articles.push(FetchedArticle {
                source_id,
                external_id: item.id.to_string(),
                title,
                content: item.text.filter(|t| !t.is_empty()),
                url,
                fetched_at: item_fetched_at(item.time),
            });
        }
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_become_utc() {
        let ts = item_fetched_at(Some(1_700_000_000));
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_time_defaults_to_now() {
        let ts = item_fetched_at(None);
        assert!((Utc::now() - ts).num_seconds() < 5);
    }
}
