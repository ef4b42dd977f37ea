use std::env;
use std::time::Duration;

use crate::types::{PipelineError, Result};

/// Tunables for a dispatch run. Immutable once built; passed into the
/// dispatcher instead of scattered defaults.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum age of an article eligible for delivery; also the default
    /// cursor for subscriptions without any SENT record.
    pub backlog_horizon_hours: i64,
    pub max_items_per_subscription: i64,
    /// Deliverable count at or above which a single combined message
    /// replaces per-article messages.
    pub batch_threshold: usize,
    pub max_messages_per_chat_per_run: usize,
    /// When a translation is unavailable, fall back to the base-language
    /// summary instead of skipping the article.
    pub fallback_to_base: bool,
    pub base_language: String,
    /// Fixed delay between sequential sends.
    pub pacing: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backlog_horizon_hours: 48,
            max_items_per_subscription: 5,
            batch_threshold: 3,
            max_messages_per_chat_per_run: 3,
            fallback_to_base: false,
            base_language: "en".to_string(),
            pacing: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub api_key: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub seed: i64,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl SummarizerConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gpt-4o-mini".to_string(),
            max_output_tokens: 384,
            temperature: 0.1,
            seed: 42,
            request_timeout: Duration::from_secs(20),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub base_url: String,
    pub provider_name: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://libretranslate:5000".to_string(),
            provider_name: "libretranslate".to_string(),
            request_timeout: Duration::from_secs(10),
            max_retries: 1,
        }
    }
}

/// Full pipeline configuration. Credentials are read from the environment
/// and missing ones fail eagerly at startup rather than mid-run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub telegram_bot_token: String,
    pub summarizer: SummarizerConfig,
    pub translator: TranslatorConfig,
    pub dispatch: DispatchConfig,
    pub ingest_limit: usize,
    pub summarize_limit: i64,
    pub translate_limit: i64,
    pub run_interval: Duration,
    /// How long a run may hold the single-run lease before it is
    /// considered stale and can be stolen.
    pub lease_ttl: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://pingbrief.db?mode=rwc".to_string());
        let telegram_bot_token = require_env("TELEGRAM_BOT_TOKEN")?;
        let openai_api_key = require_env("OPENAI_API_KEY")?;

        let mut translator = TranslatorConfig::default();
        if let Ok(url) = env::var("TRANSLATE_BASE_URL") {
            translator.base_url = url;
        }

        let mut summarizer = SummarizerConfig::new(openai_api_key);
        if let Ok(model) = env::var("OPENAI_MODEL") {
            summarizer.model = model;
        }

        Ok(Self {
            database_url,
            telegram_bot_token,
            summarizer,
            translator,
            dispatch: DispatchConfig::default(),
            ingest_limit: 50,
            summarize_limit: 200,
            translate_limit: 500,
            run_interval: Duration::from_secs(300),
            lease_ttl: Duration::from_secs(600),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PipelineError::Config(format!("environment variable {} is not set", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_defaults_match_schedule() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.backlog_horizon_hours, 48);
        assert_eq!(cfg.batch_threshold, 3);
        assert_eq!(cfg.max_messages_per_chat_per_run, 3);
        assert!(!cfg.fallback_to_base);
        assert_eq!(cfg.base_language, "en");
    }
}
