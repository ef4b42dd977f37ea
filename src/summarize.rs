use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SummarizerConfig;
use crate::store::Store;
use crate::types::{Article, PipelineError, Result};

/// Content shorter than this, counted in characters, gets the
/// deterministic title+url fallback without touching the summarizer.
pub const MIN_CONTENT_LEN: usize = 40;

const SYSTEM_PROMPT: &str = "You are a world-class technology news editor. \
Write a concise TL;DR in English as 3-5 short bullet points. \
Be factual and specific (who/what/when/why/impact). \
No marketing fluff, no speculation. \
Total length under 600 characters. \
Output only bullet points starting with '- '.";

#[derive(Debug, Clone)]
pub struct SummarizeRequest {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
}

/// External summarizer collaborator. May fail transiently; callers defer
/// failed articles to the next scheduled run.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummarizeRequest) -> Result<String>;
}

/// OpenAI chat-completions summarizer with fixed decoding parameters for
/// reproducibility and bounded retries on transient failures.
pub struct OpenAiSummarizer {
    client: Client,
    config: SummarizerConfig,
    api_base: String,
}

impl OpenAiSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(PipelineError::Config("OpenAI API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(PipelineError::Http)?;
        Ok(Self {
            client,
            config,
            api_base: "https://api.openai.com/v1".to_string(),
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn compose_article(request: &SummarizeRequest) -> String {
        let mut parts = Vec::new();
        if !request.title.is_empty() {
            parts.push(format!("Title: {}", request.title));
        }
        if !request.content.is_empty() {
            parts.push(format!("Article:\n{}", request.content));
        }
        if let Some(url) = &request.url {
            parts.push(format!("Source: {}", url));
        }
        parts.join("\n\n")
    }

    async fn request_once(&self, request: &SummarizeRequest) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_output_tokens,
            "seed": self.config.seed,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::compose_article(request)},
            ],
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::Summarizer(format!(
                "HTTP {} from summarizer",
                response.status()
            )));
        }
        let payload: serde_json::Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PipelineError::Summarizer("malformed completion payload".to_string()))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, request: &SummarizeRequest) -> Result<String> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            match self.request_once(request).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Summarizer attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| PipelineError::Summarizer("summarizer exhausted retries".into())))
    }
}

/// Normalize raw model output: drop bullet/number prefixes, keep at most
/// five lines, clamp to 700 characters.
pub fn postprocess_summary(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(['\u{2022}', '-', '*'])
                .trim_start()
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ')
                .to_string()
        })
        .filter(|l| !l.is_empty())
        .take(5)
        .collect();
    let mut result = lines.join("\n");
    if result.chars().count() > 700 {
        result = result.chars().take(700).collect::<String>().trim_end().to_string();
    }
    result
}

/// Deterministic fallback for articles with thin or missing content.
pub fn fallback_summary(article: &Article) -> String {
    format!("{}\n{}", article.title, article.url)
}

/// Summarization stage: consumes un-summarized articles and fills
/// `article.summary` exactly once. Idempotent across runs; articles that
/// fail keep a null summary and are retried next round.
pub struct SummarizeStage {
    store: Arc<Store>,
    agent: Arc<dyn Summarizer>,
}

impl SummarizeStage {
    pub fn new(store: Arc<Store>, agent: Arc<dyn Summarizer>) -> Self {
        Self { store, agent }
    }

    /// Returns the number of summaries written this round.
    pub async fn summarize_pending(&self, limit: i64) -> Result<usize> {
        let pending = self.store.articles_pending_summary(limit).await?;
        debug!("{} articles pending summarization", pending.len());

        let mut written = 0usize;
        for article in pending {
            let content = article.content.as_deref().map(str::trim).unwrap_or("");

            if content.chars().count() < MIN_CONTENT_LEN {
                self.store
                    .set_summary(article.id, &fallback_summary(&article))
                    .await?;
                written += 1;
                continue;
            }

            let request = SummarizeRequest {
                title: article.title.clone(),
                content: content.to_string(),
                url: Some(article.url.clone()),
            };
            match self.agent.summarize(&request).await {
                Ok(raw) => {
                    let summary = postprocess_summary(&raw);
                    if summary.is_empty() {
                        self.store
                            .set_summary(article.id, &fallback_summary(&article))
                            .await?;
                    } else {
                        self.store.set_summary(article.id, &summary).await?;
                    }
                    written += 1;
                }
                Err(e) => {
                    // Summary stays null; the next scheduled run retries it.
                    warn!("Skipping article {} this round: {}", article.id, e);
                }
            }
        }

        if written > 0 {
            info!("Wrote {} summaries", written);
        }
        Ok(written)
    }
}
