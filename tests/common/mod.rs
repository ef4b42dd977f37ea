use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use pingbrief::summarize::SummarizeRequest;
use pingbrief::transport::OutboundMessage;
use pingbrief::types::{Article, FetchedArticle, PipelineError, Result, Source, Subscription, User};
use pingbrief::{MessageTransport, NewsSource, Store, Summarizer, Translator};

/// Summarizer double that counts invocations and returns a canned text.
pub struct MockSummarizer {
    pub calls: AtomicUsize,
    pub reply: String,
    pub fail: bool,
}

impl MockSummarizer {
    pub fn returning(reply: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: reply.to_string(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            reply: String::new(),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, _request: &SummarizeRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::Summarizer("mock failure".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// Translator double: prefixes the target language so assertions can tell
/// translated text from base text. Counts every external call.
pub struct MockTranslator {
    pub calls: AtomicUsize,
    pub unavailable: bool,
}

impl MockTranslator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            unavailable: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        target_lang: &str,
    ) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Ok(None);
        }
        Ok(Some(format!("[{}] {}", target_lang, text)))
    }
}

/// Source double serving a fixed set of items on every poll, the way an
/// unchanged upstream feed does.
pub struct FixedSource {
    key: String,
    items: Vec<FetchedArticle>,
}

impl FixedSource {
    pub fn new(key: &str, items: Vec<FetchedArticle>) -> Self {
        Self {
            key: key.to_string(),
            items,
        }
    }
}

#[async_trait]
impl NewsSource for FixedSource {
    fn source_key(&self) -> &str {
        &self.key
    }

    fn source_name(&self) -> &str {
        &self.key
    }

    fn source_url(&self) -> &str {
        "https://fixed.example.com/feed"
    }

    async fn fetch_latest(&self, source_id: Uuid, limit: usize) -> Result<Vec<FetchedArticle>> {
        Ok(self
            .items
            .iter()
            .take(limit)
            .cloned()
            .map(|mut item| {
                item.source_id = source_id;
                item
            })
            .collect())
    }
}

/// Transport double capturing every message instead of sending it.
pub struct CapturingTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl CapturingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageTransport for CapturingTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub async fn test_store() -> Arc<Store> {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    Arc::new(Store::in_memory().await.expect("in-memory store"))
}

pub async fn seed_source(store: &Store, key: &str) -> Source {
    store
        .ensure_source(key, &format!("https://{}.example.com/feed", key), "en")
        .await
        .expect("source")
}

/// Insert an article `age` old with the given summary already set.
pub async fn seed_article(
    store: &Store,
    source_id: Uuid,
    external_id: &str,
    summary: Option<&str>,
    age: Duration,
) -> Article {
    let article = seed_article_at(store, source_id, external_id, Utc::now() - age).await;
    if let Some(summary) = summary {
        store.set_summary(article.id, summary).await.expect("summary");
        return store.article(article.id).await.expect("article");
    }
    article
}

pub async fn seed_article_at(
    store: &Store,
    source_id: Uuid,
    external_id: &str,
    fetched_at: DateTime<Utc>,
) -> Article {
    let (article, _) = store
        .ingest_article(&FetchedArticle {
            source_id,
            external_id: external_id.to_string(),
            title: format!("Title {}", external_id),
            content: Some(format!(
                "Body of article {} with enough text to summarize properly.",
                external_id
            )),
            url: format!("https://articles.example.com/{}", external_id),
            fetched_at,
        })
        .await
        .expect("article");
    article
}

pub async fn seed_user(store: &Store, chat_id: &str) -> User {
    store.create_user(chat_id, None).await.expect("user")
}

pub async fn seed_subscription(
    store: &Store,
    user_id: Uuid,
    source_id: Uuid,
    language: &str,
) -> Subscription {
    store
        .subscribe(user_id, source_id, language)
        .await
        .expect("subscription")
}
