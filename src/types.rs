use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured news source (Hacker News, an RSS feed, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub default_language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ingested article. Identity is (source_id, external_id); the summary
/// field transitions once from None to Some and rows are never deleted by
/// the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw item produced by a `NewsSource` before it hits the article store.
#[derive(Debug, Clone)]
pub struct FetchedArticle {
    pub source_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
}

/// A chat subscriber. `chat_id` is the messaging-platform identity;
/// `premium_until` drives the access gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub chat_id: String,
    pub username: Option<String>,
    pub premium_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A (user, source, language) subscription. Unique per (user, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_id: Uuid,
    pub language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Cached translation of an article summary. One logical row per
/// (article, language); `content_hash` is the digest of the base summary
/// the translation was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Translation {
    pub id: Uuid,
    pub article_id: Uuid,
    pub language: String,
    pub provider: String,
    pub content_hash: String,
    pub translated_text: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// Append-only delivery log entry. At most one SENT row exists per
/// (subscription, url); the max `sent_at` over SENT rows is the
/// subscription's delivery cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub subscription_id: Uuid,
    pub title: String,
    pub body: String,
    pub url: String,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing configuration: {0}")]
    Config(String),

    #[error("Source not found: {name}")]
    SourceNotFound { name: String },

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
