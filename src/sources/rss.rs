use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use tracing::{debug, info};
use uuid::Uuid;

use super::{get_text_with_retry, NewsSource};
use crate::types::{FetchedArticle, PipelineError, Result};

/// Generic RSS/Atom connector backed by feed-rs.
pub struct RssSource {
    client: reqwest::Client,
    key: String,
    name: String,
    feed_url: String,
}

impl RssSource {
    pub fn new(
        client: reqwest::Client,
        key: impl Into<String>,
        name: impl Into<String>,
        feed_url: impl Into<String>,
    ) -> Result<Self> {
        let feed_url = feed_url.into();
        url::Url::parse(&feed_url).map_err(|_| PipelineError::InvalidUrl(feed_url.clone()))?;
        Ok(Self {
            client,
            key: key.into(),
            name: name.into(),
            feed_url,
        })
    }
}

#[async_trait]
impl NewsSource for RssSource {
    fn source_key(&self) -> &str {
        &self.key
    }

    fn source_name(&self) -> &str {
        &self.name
    }

    fn source_url(&self) -> &str {
        &self.feed_url
    }

    async fn fetch_latest(&self, source_id: Uuid, limit: usize) -> Result<Vec<FetchedArticle>> {
        let body = get_text_with_retry(&self.client, &self.feed_url).await?;
        let feed = parser::parse(body.as_bytes())
            .map_err(|e| PipelineError::Parse(format!("{}: {}", self.feed_url, e)))?;

        let mut articles = Vec::new();
        for entry in feed.entries.into_iter().take(limit) {
            let title = match entry.title {
                Some(t) if !t.content.is_empty() => t.content,
                _ => continue,
            };
            let link = match entry.links.first() {
                Some(link) => link.href.clone(),
                None => {
                    debug!("Entry '{}' has no link, skipping", title);
                    continue;
                }
            };
            if url::Url::parse(&link).is_err() {
                debug!("Entry '{}' has invalid link {}, skipping", title, link);
                continue;
            }
            // The guid is the stable id when present; the link otherwise.
            let external_id = if entry.id.is_empty() {
                link.clone()
            } else {
                entry.id
            };
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .filter(|c| !c.is_empty());
            let fetched_at = entry.published.or(entry.updated).unwrap_or_else(Utc::now);
            articles.push(FetchedArticle {
                source_id,
                external_id,
                title,
                content,
                url: link,
                fetched_at,
            });
        }
        info!("Parsed {} entries from {}", articles.len(), self.feed_url);
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_feed_url_is_rejected() {
        let client = reqwest::Client::new();
        let result = RssSource::new(client, "bad", "Bad", "not a url");
        assert!(matches!(result, Err(PipelineError::InvalidUrl(_))));
    }
}
