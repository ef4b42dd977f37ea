use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TranslatorConfig;
use crate::store::Store;
use crate::types::{Article, PipelineError, Result};

/// Digest of a summary's text, used to detect staleness of cached
/// translations.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// External translation collaborator. `Ok(None)` means the provider could
/// not produce a translation; the caller decides the fallback policy.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<String>>;
}

/// LibreTranslate HTTP client with a bounded timeout. Transient failures
/// are retried once and then reported as `None`.
pub struct LibreTranslator {
    client: Client,
    config: TranslatorConfig,
}

impl LibreTranslator {
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(PipelineError::Http)?;
        Ok(Self { client, config })
    }

    pub fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    async fn request_once(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<String>> {
        let response = self
            .client
            .post(format!("{}/translate", self.config.base_url))
            .json(&json!({
                "q": text,
                "source": source_lang,
                "target": target_lang,
                "format": "text",
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            debug!("Translator returned HTTP {}", response.status());
            return Ok(None);
        }
        let payload: serde_json::Value = response.json().await?;
        let translated = payload["translatedText"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        Ok(translated)
    }
}

#[async_trait]
impl Translator for LibreTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<String>> {
        for attempt in 0..=self.config.max_retries {
            match self.request_once(text, source_lang, target_lang).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        "Translation attempt {} to {} failed: {}",
                        attempt + 1,
                        target_lang,
                        e
                    );
                }
            }
        }
        Ok(None)
    }
}

/// Per (article, language) translation cache with staleness detection.
///
/// A cached row is valid iff its stored hash matches the digest of the
/// article's current summary; a mismatch triggers re-translation in place.
/// No history is kept and unchanged content never causes external calls.
pub struct TranslationCache {
    store: Arc<Store>,
    translator: Arc<dyn Translator>,
    provider: String,
    base_language: String,
}

impl TranslationCache {
    pub fn new(
        store: Arc<Store>,
        translator: Arc<dyn Translator>,
        provider: impl Into<String>,
        base_language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            translator,
            provider: provider.into(),
            base_language: base_language.into(),
        }
    }

    pub fn base_language(&self) -> &str {
        &self.base_language
    }

    /// Resolve the summary text for `target_language`, translating (and
    /// caching) only when necessary. `None` means no usable text exists.
    pub async fn get_or_translate(
        &self,
        article: &Article,
        target_language: &str,
    ) -> Result<Option<String>> {
        let base = match article.summary.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(None),
        };

        if target_language == self.base_language {
            return Ok(Some(base.to_string()));
        }

        let hash = content_hash(base);
        if let Some(existing) = self.store.translation(article.id, target_language).await? {
            if existing.content_hash == hash {
                debug!(
                    "Translation cache hit for article {} lang {}",
                    article.id, target_language
                );
                return Ok(Some(existing.translated_text));
            }
            debug!(
                "Stale translation for article {} lang {}, re-translating",
                article.id, target_language
            );
        }

        let translated = self
            .translator
            .translate(base, &self.base_language, target_language)
            .await?;
        match translated {
            Some(text) => {
                self.store
                    .upsert_translation(article.id, target_language, &self.provider, &hash, &text)
                    .await?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Proactive warm-up: translate recent summaries into every non-base
    /// language some active subscription of that source wants.
    pub async fn translate_needed(&self, limit: i64) -> Result<usize> {
        let pairs = self.store.active_source_languages().await?;
        let mut by_source: HashMap<Uuid, HashSet<String>> = HashMap::new();
        for (source_id, language) in pairs {
            by_source.entry(source_id).or_default().insert(language);
        }

        let articles = self.store.articles_with_summary(limit).await?;
        let mut translated = 0usize;
        for article in &articles {
            let Some(languages) = by_source.get(&article.source_id) else {
                continue;
            };
            let Some(base) = article.summary.as_deref().map(str::trim).filter(|s| !s.is_empty())
            else {
                continue;
            };
            let hash = content_hash(base);
            for language in languages {
                if language == &self.base_language {
                    continue;
                }
                // Fresh rows need no work; only misses and stale rows count.
                if let Some(existing) = self.store.translation(article.id, language).await? {
                    if existing.content_hash == hash {
                        continue;
                    }
                }
                if self.get_or_translate(article, language).await?.is_some() {
                    translated += 1;
                }
            }
        }
        if translated > 0 {
            info!("Warmed {} translations", translated);
        }
        Ok(translated)
    }
}
