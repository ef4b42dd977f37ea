mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::*;
use pingbrief::translate::content_hash;
use pingbrief::types::FetchedArticle;
use pingbrief::{SummarizeStage, TranslationCache};

#[tokio::test]
async fn re_ingesting_an_article_is_a_no_op() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let item = FetchedArticle {
        source_id: source.id,
        external_id: "42".to_string(),
        title: "First sighting".to_string(),
        content: Some("Original body text that is long enough to matter.".to_string()),
        url: "https://articles.example.com/42".to_string(),
        fetched_at: Utc::now() - Duration::hours(1),
    };

    let (first, created) = store.ingest_article(&item).await.unwrap();
    assert!(created);
    let mut again = item.clone();
    again.title = "Changed title".to_string();
    again.content = Some("Sparser replacement".to_string());
    let (second, created) = store.ingest_article(&again).await.unwrap();

    assert!(!created);
    assert_eq!(first.id, second.id);
    assert_eq!(second.title, "First sighting");
    assert_eq!(
        second.content.as_deref(),
        Some("Original body text that is long enough to matter.")
    );
}

#[tokio::test]
async fn re_ingesting_fills_missing_content_only() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let mut item = FetchedArticle {
        source_id: source.id,
        external_id: "43".to_string(),
        title: "Link-only story".to_string(),
        content: None,
        url: "https://articles.example.com/43".to_string(),
        fetched_at: Utc::now() - Duration::hours(1),
    };
    let (first, _) = store.ingest_article(&item).await.unwrap();
    assert!(first.content.is_none());

    item.content = Some("Extracted body arriving on the second poll.".to_string());
    let (second, created) = store.ingest_article(&item).await.unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);
    assert_eq!(
        second.content.as_deref(),
        Some("Extracted body arriving on the second poll.")
    );
}

#[tokio::test]
async fn unchanged_feed_reports_zero_new_articles() {
    let store = test_store().await;
    let mut ingestor = pingbrief::Ingestor::new(store.clone(), 50);
    ingestor.register(Arc::new(FixedSource::new(
        "fixed",
        vec![FetchedArticle {
            source_id: Uuid::nil(),
            external_id: "1".to_string(),
            title: "Steady story".to_string(),
            content: Some("A body that does not change between polls.".to_string()),
            url: "https://articles.example.com/steady".to_string(),
            fetched_at: Utc::now() - Duration::hours(1),
        }],
    )));

    assert_eq!(ingestor.run().await.unwrap(), 1);
    // The same feed content on the next poll creates nothing.
    assert_eq!(ingestor.run().await.unwrap(), 0);
}

#[tokio::test]
async fn each_article_is_summarized_exactly_once() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let article = seed_article(&store, source.id, "a", None, Duration::hours(1)).await;

    let agent = Arc::new(MockSummarizer::returning("- key point one\n- key point two"));
    let stage = SummarizeStage::new(store.clone(), agent.clone());

    assert_eq!(stage.summarize_pending(100).await.unwrap(), 1);
    assert_eq!(agent.call_count(), 1);
    let stored = store.article(article.id).await.unwrap();
    assert_eq!(stored.summary.as_deref(), Some("key point one\nkey point two"));

    // The second pass sees no pending work and makes no model calls.
    assert_eq!(stage.summarize_pending(100).await.unwrap(), 0);
    assert_eq!(agent.call_count(), 1);
}

#[tokio::test]
async fn thin_content_gets_title_and_link_without_model_call() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let (article, _) = store
        .ingest_article(&FetchedArticle {
            source_id: source.id,
            external_id: "thin".to_string(),
            title: "Short one".to_string(),
            content: Some("too short".to_string()),
            url: "https://articles.example.com/thin".to_string(),
            fetched_at: Utc::now() - Duration::hours(1),
        })
        .await
        .unwrap();

    let agent = Arc::new(MockSummarizer::returning("unused"));
    let stage = SummarizeStage::new(store.clone(), agent.clone());
    assert_eq!(stage.summarize_pending(100).await.unwrap(), 1);

    assert_eq!(agent.call_count(), 0);
    let stored = store.article(article.id).await.unwrap();
    assert_eq!(
        stored.summary.as_deref(),
        Some("Short one\nhttps://articles.example.com/thin")
    );
}

#[tokio::test]
async fn multibyte_content_length_is_counted_in_characters() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    // 20 CJK characters: well under the 40-character floor even though the
    // byte length is 60.
    let (article, _) = store
        .ingest_article(&FetchedArticle {
            source_id: source.id,
            external_id: "cjk".to_string(),
            title: "\u{77ed}\u{6587}".to_string(),
            content: Some("\u{65b0}\u{805e}".repeat(10)),
            url: "https://articles.example.com/cjk".to_string(),
            fetched_at: Utc::now() - Duration::hours(1),
        })
        .await
        .unwrap();

    let agent = Arc::new(MockSummarizer::returning("unused"));
    let stage = SummarizeStage::new(store.clone(), agent.clone());
    assert_eq!(stage.summarize_pending(100).await.unwrap(), 1);

    assert_eq!(agent.call_count(), 0);
    let stored = store.article(article.id).await.unwrap();
    assert_eq!(
        stored.summary.as_deref(),
        Some("\u{77ed}\u{6587}\nhttps://articles.example.com/cjk")
    );
}

#[tokio::test]
async fn failed_summarization_is_retried_next_round() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let article = seed_article(&store, source.id, "a", None, Duration::hours(1)).await;

    let failing = Arc::new(MockSummarizer::failing());
    let stage = SummarizeStage::new(store.clone(), failing.clone());
    assert_eq!(stage.summarize_pending(100).await.unwrap(), 0);
    assert_eq!(failing.call_count(), 1);
    assert!(store.article(article.id).await.unwrap().summary.is_none());

    let working = Arc::new(MockSummarizer::returning("Recovered summary"));
    let stage = SummarizeStage::new(store.clone(), working.clone());
    assert_eq!(stage.summarize_pending(100).await.unwrap(), 1);
    assert_eq!(
        store.article(article.id).await.unwrap().summary.as_deref(),
        Some("Recovered summary")
    );
}

#[tokio::test]
async fn translations_are_cached_until_the_summary_changes() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let article =
        seed_article(&store, source.id, "a", Some("First summary"), Duration::hours(1)).await;

    let translator = Arc::new(MockTranslator::new());
    let cache = TranslationCache::new(store.clone(), translator.clone(), "mock", "en");

    let text = cache.get_or_translate(&article, "de").await.unwrap();
    assert_eq!(text.as_deref(), Some("[de] First summary"));
    assert_eq!(translator.call_count(), 1);

    // Unchanged summary serves from the cache.
    let text = cache.get_or_translate(&article, "de").await.unwrap();
    assert_eq!(text.as_deref(), Some("[de] First summary"));
    assert_eq!(translator.call_count(), 1);

    // An updated summary invalidates the row and re-translates in place.
    store.set_summary(article.id, "Second summary").await.unwrap();
    let article = store.article(article.id).await.unwrap();
    let text = cache.get_or_translate(&article, "de").await.unwrap();
    assert_eq!(text.as_deref(), Some("[de] Second summary"));
    assert_eq!(translator.call_count(), 2);

    let row = store.translation(article.id, "de").await.unwrap().unwrap();
    assert_eq!(row.translated_text, "[de] Second summary");
    assert_eq!(row.content_hash, content_hash("Second summary"));
}

#[tokio::test]
async fn warm_up_translates_for_active_languages_only() {
    let store = test_store().await;
    let source = seed_source(&store, "hn").await;
    let user = seed_user(&store, "2001").await;
    seed_subscription(&store, user.id, source.id, "fr").await;
    seed_article(&store, source.id, "a", Some("Summary A"), Duration::hours(1)).await;
    let en_user = seed_user(&store, "2002").await;
    let other = seed_source(&store, "blog").await;
    seed_subscription(&store, en_user.id, other.id, "en").await;
    seed_article(&store, other.id, "b", Some("Summary B"), Duration::hours(1)).await;

    let translator = Arc::new(MockTranslator::new());
    let cache = TranslationCache::new(store.clone(), translator.clone(), "mock", "en");

    let translated = cache.translate_needed(100).await.unwrap();
    // Only the French subscription needs a translation; base language rows
    // are never materialized.
    assert_eq!(translated, 1);
    assert_eq!(translator.call_count(), 1);

    // Warm again: everything is already cached.
    assert_eq!(cache.translate_needed(100).await.unwrap(), 0);
    assert_eq!(translator.call_count(), 1);
}

#[tokio::test]
async fn run_lease_blocks_concurrent_holders() {
    let store = test_store().await;
    let ttl = StdDuration::from_secs(600);

    assert!(store.acquire_run_lease("pipeline_run", "alpha", ttl).await.unwrap());
    assert!(!store.acquire_run_lease("pipeline_run", "beta", ttl).await.unwrap());

    store.release_run_lease("pipeline_run", "alpha").await.unwrap();
    assert!(store.acquire_run_lease("pipeline_run", "beta", ttl).await.unwrap());
}

#[tokio::test]
async fn expired_lease_is_stolen() {
    let store = test_store().await;

    assert!(store
        .acquire_run_lease("pipeline_run", "alpha", StdDuration::ZERO)
        .await
        .unwrap());
    // TTL of zero expires immediately, so a new holder takes over.
    assert!(store
        .acquire_run_lease("pipeline_run", "beta", StdDuration::from_secs(600))
        .await
        .unwrap());
}
