//! Embedded SQLite schema, applied on connect.

pub const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS sources (
    id               BLOB PRIMARY KEY,
    name             TEXT NOT NULL UNIQUE,
    url              TEXT NOT NULL,
    default_language TEXT NOT NULL DEFAULT 'en',
    is_active        INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS articles (
    id          BLOB PRIMARY KEY,
    source_id   BLOB NOT NULL REFERENCES sources(id),
    external_id TEXT NOT NULL,
    title       TEXT NOT NULL,
    content     TEXT,
    summary     TEXT,
    url         TEXT NOT NULL,
    fetched_at  TEXT NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (source_id, external_id)
)
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_articles_pending_summary
    ON articles (created_at) WHERE summary IS NULL
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_articles_source_fetched
    ON articles (source_id, fetched_at)
"#,
    r#"
CREATE TABLE IF NOT EXISTS users (
    id            BLOB PRIMARY KEY,
    chat_id       TEXT NOT NULL UNIQUE,
    username      TEXT,
    premium_until TEXT,
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id         BLOB PRIMARY KEY,
    user_id    BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    source_id  BLOB NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    language   TEXT NOT NULL DEFAULT 'en',
    is_active  INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (user_id, source_id)
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS translations (
    id              BLOB PRIMARY KEY,
    article_id      BLOB NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    language        TEXT NOT NULL,
    provider        TEXT NOT NULL,
    content_hash    TEXT NOT NULL,
    translated_text TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (article_id, language)
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS deliveries (
    id              BLOB PRIMARY KEY,
    user_id         BLOB REFERENCES users(id) ON DELETE SET NULL,
    subscription_id BLOB NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    body            TEXT NOT NULL,
    url             TEXT NOT NULL,
    scheduled_for   TEXT NOT NULL,
    sent_at         TEXT,
    status          TEXT NOT NULL DEFAULT 'pending'
)
"#,
    // The dedup invariant: at most one SENT row per (subscription, url).
    r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_deliveries_sent_once
    ON deliveries (subscription_id, url) WHERE status = 'sent'
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_deliveries_cursor
    ON deliveries (subscription_id, status, sent_at)
"#,
    r#"
CREATE TABLE IF NOT EXISTS run_lease (
    name        TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
)
"#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_covers_all_tables() {
        let joined = SCHEMA.join("\n");
        for table in [
            "sources",
            "articles",
            "users",
            "subscriptions",
            "translations",
            "deliveries",
            "run_lease",
        ] {
            assert!(
                joined.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "missing table {}",
                table
            );
        }
        assert!(joined.contains("idx_deliveries_sent_once"));
    }
}
