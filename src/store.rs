use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

use crate::schema::SCHEMA;
use crate::types::{
    Article, DeliveryRecord, DeliveryStatus, FetchedArticle, PipelineError, Result, Source,
    Subscription, Translation, User,
};

/// Transactional datastore for the whole pipeline: articles, subscribers,
/// translations and the append-only delivery log.
pub struct Store {
    db: Pool<Sqlite>,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the database
    /// alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { db };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.db)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        debug!("Schema initialized ({} statements)", SCHEMA.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    /// Find a source by name, creating it if absent.
    pub async fn ensure_source(
        &self,
        name: &str,
        url: &str,
        default_language: &str,
    ) -> Result<Source> {
        if let Some(row) = sqlx::query("SELECT * FROM sources WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.db)
            .await?
        {
            return map_source(&row);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, url, default_language, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(url)
        .bind(default_language)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        info!("Registered source {} ({})", name, id);
        self.source(id).await
    }

    pub async fn source(&self, id: Uuid) -> Result<Source> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        map_source(&row)
    }

    // ------------------------------------------------------------------
    // Articles
    // ------------------------------------------------------------------

    /// Idempotent article upsert keyed by (source_id, external_id).
    ///
    /// A second sighting never creates a duplicate and only fills fields
    /// that are still empty (content from a richer extraction strategy);
    /// it never overwrites a non-empty field with sparser data. The flag
    /// is true only when a new row was created.
    pub async fn ingest_article(&self, item: &FetchedArticle) -> Result<(Article, bool)> {
        if let Some(existing) = self
            .article_by_external_id(item.source_id, &item.external_id)
            .await?
        {
            let has_content = existing
                .content
                .as_deref()
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false);
            let incoming = item
                .content
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty());
            if !has_content {
                if let Some(content) = incoming {
                    sqlx::query("UPDATE articles SET content = ?, updated_at = ? WHERE id = ?")
                        .bind(content)
                        .bind(Utc::now())
                        .bind(existing.id)
                        .execute(&self.db)
                        .await?;
                    debug!("Filled content for article {}", existing.id);
                    return Ok((self.article(existing.id).await?, false));
                }
            }
            return Ok((existing, false));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO articles
                (id, source_id, external_id, title, content, summary, url, fetched_at,
                 is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(id)
        .bind(item.source_id)
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.url)
        .bind(item.fetched_at)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok((self.article(id).await?, true))
    }

    pub async fn article(&self, id: Uuid) -> Result<Article> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        map_article(&row)
    }

    pub async fn article_by_external_id(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE source_id = ? AND external_id = ?")
            .bind(source_id)
            .bind(external_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(map_article).transpose()
    }

    /// Articles whose summary is still null, newest first.
    pub async fn articles_pending_summary(&self, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles WHERE summary IS NULL ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(map_article).collect()
    }

    /// Recent articles that already carry a summary, newest first. Used by
    /// the proactive translation warm-up.
    pub async fn articles_with_summary(&self, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            "SELECT * FROM articles WHERE summary IS NOT NULL ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(map_article).collect()
    }

    pub async fn set_summary(&self, article_id: Uuid, summary: &str) -> Result<()> {
        sqlx::query("UPDATE articles SET summary = ?, updated_at = ? WHERE id = ?")
            .bind(summary)
            .bind(Utc::now())
            .bind(article_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Dispatch candidates: active, summarized, fetched after the cursor
    /// and within the backlog horizon, oldest first.
    pub async fn candidate_articles(
        &self,
        source_id: Uuid,
        cursor: DateTime<Utc>,
        horizon_floor: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM articles
            WHERE source_id = ?
              AND is_active = 1
              AND fetched_at > ?
              AND fetched_at >= ?
              AND summary IS NOT NULL
            ORDER BY fetched_at ASC
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(cursor)
        .bind(horizon_floor)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(map_article).collect()
    }

    // ------------------------------------------------------------------
    // Users & subscriptions
    // ------------------------------------------------------------------

    pub async fn create_user(&self, chat_id: &str, username: Option<&str>) -> Result<User> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (id, chat_id, username, premium_until, is_active, created_at)
            VALUES (?, ?, ?, NULL, 1, ?)
            "#,
        )
        .bind(id)
        .bind(chat_id)
        .bind(username)
        .bind(now)
        .execute(&self.db)
        .await?;
        self.user(id).await
    }

    pub async fn user(&self, id: Uuid) -> Result<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await?;
        map_user(&row)
    }

    pub async fn set_premium_until(
        &self,
        user_id: Uuid,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET premium_until = ? WHERE id = ?")
            .bind(until)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn active_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users WHERE is_active = 1 ORDER BY created_at")
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(map_user).collect()
    }

    /// Upsert a subscription on (user, source); re-subscribing reactivates
    /// and updates the language.
    pub async fn subscribe(
        &self,
        user_id: Uuid,
        source_id: Uuid,
        language: &str,
    ) -> Result<Subscription> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, source_id, language, is_active, created_at)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT (user_id, source_id) DO UPDATE SET
                language = excluded.language,
                is_active = 1
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(source_id)
        .bind(language)
        .bind(now)
        .execute(&self.db)
        .await?;

        let row = sqlx::query("SELECT * FROM subscriptions WHERE user_id = ? AND source_id = ?")
            .bind(user_id)
            .bind(source_id)
            .fetch_one(&self.db)
            .await?;
        map_subscription(&row)
    }

    pub async fn set_subscription_active(&self, subscription_id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(subscription_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn active_subscriptions(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT * FROM subscriptions WHERE user_id = ? AND is_active = 1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(map_subscription).collect()
    }

    /// Distinct (source, language) pairs of active subscriptions; drives
    /// the proactive translation warm-up.
    pub async fn active_source_languages(&self) -> Result<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT source_id, language FROM subscriptions WHERE is_active = 1",
        )
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("source_id")?, row.try_get("language")?)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Translations
    // ------------------------------------------------------------------

    pub async fn translation(&self, article_id: Uuid, language: &str) -> Result<Option<Translation>> {
        let row = sqlx::query("SELECT * FROM translations WHERE article_id = ? AND language = ?")
            .bind(article_id)
            .bind(language)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(map_translation).transpose()
    }

    /// One logical translation per (article, language): a stale row is
    /// overwritten in place, never duplicated.
    pub async fn upsert_translation(
        &self,
        article_id: Uuid,
        language: &str,
        provider: &str,
        content_hash: &str,
        translated_text: &str,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO translations
                (id, article_id, language, provider, content_hash, translated_text, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (article_id, language) DO UPDATE SET
                provider = excluded.provider,
                content_hash = excluded.content_hash,
                translated_text = excluded.translated_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(article_id)
        .bind(language)
        .bind(provider)
        .bind(content_hash)
        .bind(translated_text)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delivery log
    // ------------------------------------------------------------------

    /// The subscription's delivery cursor: max sent_at over SENT records,
    /// excluding the sentinel notice url. None means no delivery yet.
    pub async fn delivery_cursor(
        &self,
        subscription_id: Uuid,
        sentinel_url: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let cursor: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(sent_at) FROM deliveries
            WHERE subscription_id = ? AND status = 'sent' AND url <> ?
            "#,
        )
        .bind(subscription_id)
        .bind(sentinel_url)
        .fetch_one(&self.db)
        .await?;
        Ok(cursor)
    }

    /// Urls already SENT for a subscription. Defensive re-check against the
    /// cursor (clock skew, re-ingestion).
    pub async fn sent_urls(&self, subscription_id: Uuid) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT url FROM deliveries WHERE subscription_id = ? AND status = 'sent'",
        )
        .bind(subscription_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(|row| Ok(row.try_get("url")?)).collect()
    }

    /// Append a SENT delivery record. Returns false when a SENT record for
    /// this (subscription, url) already exists -- the unique-index conflict
    /// is the dedup check working, not an error.
    pub async fn record_sent_delivery(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        title: &str,
        body: &str,
        url: &str,
    ) -> Result<bool> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO deliveries
                (id, user_id, subscription_id, title, body, url, scheduled_for, sent_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(subscription_id)
        .bind(title)
        .bind(body)
        .bind(url)
        .bind(now)
        .bind(now)
        .bind(DeliveryStatus::Sent.as_str())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record (or refresh) the one-per-episode lock notice. The sentinel
    /// url collides with the sent-once index on purpose; refreshing
    /// `sent_at` restarts the suppression window.
    pub async fn record_lock_notice(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        body: &str,
        url: &str,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO deliveries
                (id, user_id, subscription_id, title, body, url, scheduled_for, sent_at, status)
            VALUES (?, ?, ?, 'premium-lock', ?, ?, ?, ?, 'sent')
            ON CONFLICT (subscription_id, url) WHERE status = 'sent' DO UPDATE SET
                body = excluded.body,
                sent_at = excluded.sent_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(subscription_id)
        .bind(body)
        .bind(url)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Whether a SENT record with the given url exists for the user since
    /// `since`. Used to suppress repeated lock notices within the horizon.
    pub async fn has_sent_url_since(
        &self,
        user_id: Uuid,
        url: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM deliveries
            WHERE user_id = ? AND url = ? AND status = 'sent' AND sent_at >= ?
            "#,
        )
        .bind(user_id)
        .bind(url)
        .bind(since)
        .fetch_one(&self.db)
        .await?;
        Ok(count > 0)
    }

    pub async fn deliveries(&self, subscription_id: Uuid) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM deliveries WHERE subscription_id = ? ORDER BY scheduled_for",
        )
        .bind(subscription_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(map_delivery).collect()
    }

    pub async fn sent_delivery_count(&self, subscription_id: Uuid, url: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deliveries WHERE subscription_id = ? AND url = ? AND status = 'sent'",
        )
        .bind(subscription_id)
        .bind(url)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Run lease
    // ------------------------------------------------------------------

    /// Acquire the single-active-run lease. A live lease held by someone
    /// else blocks acquisition; an expired one is stolen.
    pub async fn acquire_run_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires = now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::minutes(10));
        let result = sqlx::query(
            r#"
            INSERT INTO run_lease (name, holder, acquired_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE run_lease.expires_at < excluded.acquired_at
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now)
        .bind(expires)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_run_lease(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_lease WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn map_source(row: &SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        default_language: row.try_get("default_language")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_article(row: &SqliteRow) -> Result<Article> {
    Ok(Article {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        url: row.try_get("url")?,
        fetched_at: row.try_get("fetched_at")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        username: row.try_get("username")?,
        premium_until: row.try_get("premium_until")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_subscription(row: &SqliteRow) -> Result<Subscription> {
    Ok(Subscription {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        source_id: row.try_get("source_id")?,
        language: row.try_get("language")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_delivery(row: &SqliteRow) -> Result<DeliveryRecord> {
    let status: String = row.try_get("status")?;
    Ok(DeliveryRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        subscription_id: row.try_get("subscription_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        url: row.try_get("url")?,
        scheduled_for: row.try_get("scheduled_for")?,
        sent_at: row.try_get("sent_at")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| PipelineError::General(format!("unknown delivery status {}", status)))?,
    })
}

fn map_translation(row: &SqliteRow) -> Result<Translation> {
    Ok(Translation {
        id: row.try_get("id")?,
        article_id: row.try_get("article_id")?,
        language: row.try_get("language")?,
        provider: row.try_get("provider")?,
        content_hash: row.try_get("content_hash")?,
        translated_text: row.try_get("translated_text")?,
        updated_at: row.try_get("updated_at")?,
    })
}
