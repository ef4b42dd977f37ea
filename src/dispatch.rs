use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::access::{is_locked, AccessPolicy};
use crate::config::DispatchConfig;
use crate::store::Store;
use crate::translate::TranslationCache;
use crate::transport::{InlineKeyboard, MessageTransport, OutboundMessage};
use crate::types::{Article, Result, Subscription, User};

/// Sentinel url recorded for a premium-lock notice. Lives in the delivery
/// log alongside article urls so the same dedup machinery suppresses
/// repeat notices.
pub const PREMIUM_LOCK_URL: &str = "pingbrief://premium-lock";

const PREMIUM_LOCK_TEXT: &str = "\u{2b50} Your multi-source access has lapsed.\n\
Keep a single subscription active, or renew Premium to follow several sources at once.";

#[derive(Debug, Default, Clone)]
pub struct DispatchReport {
    pub messages_sent: usize,
    pub messages_failed: usize,
    pub articles_recorded: usize,
    pub lock_notices: usize,
}

/// Builds a send plan across every active subscription, records each
/// included article as SENT before transmission, then transmits the plan
/// sequentially with pacing. At-most-once by construction.
pub struct Dispatcher {
    store: Arc<Store>,
    translations: Arc<TranslationCache>,
    access: Arc<dyn AccessPolicy>,
    transport: Arc<dyn MessageTransport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        translations: Arc<TranslationCache>,
        access: Arc<dyn AccessPolicy>,
        transport: Arc<dyn MessageTransport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            translations,
            access,
            transport,
            config,
        }
    }

    pub async fn run(&self) -> Result<DispatchReport> {
        let now = Utc::now();
        let horizon_floor = now - Duration::hours(self.config.backlog_horizon_hours);
        let mut report = DispatchReport::default();
        let mut plan: Vec<OutboundMessage> = Vec::new();
        let mut per_chat: HashMap<String, usize> = HashMap::new();

        for user in self.store.active_users().await? {
            let subscriptions = self.store.active_subscriptions(user.id).await?;
            if subscriptions.is_empty() {
                continue;
            }

            let has_premium = self.access.has_premium(user.id).await?;
            if is_locked(subscriptions.len(), has_premium) {
                if !self
                    .store
                    .has_sent_url_since(user.id, PREMIUM_LOCK_URL, horizon_floor)
                    .await?
                {
                    self.store
                        .record_lock_notice(
                            user.id,
                            subscriptions[0].id,
                            PREMIUM_LOCK_TEXT,
                            PREMIUM_LOCK_URL,
                        )
                        .await?;
                    plan.push(OutboundMessage {
                        chat_id: user.chat_id.clone(),
                        text: PREMIUM_LOCK_TEXT.to_string(),
                        silent: false,
                        disable_preview: true,
                        keyboard: Some(InlineKeyboard::single_button(
                            "\u{2b50} Premium",
                            "open_premium",
                        )),
                    });
                    report.lock_notices += 1;
                }
                continue;
            }

            for subscription in &subscriptions {
                let queued = per_chat.get(&user.chat_id).copied().unwrap_or(0);
                if queued >= self.config.max_messages_per_chat_per_run {
                    debug!("Chat {} reached per-run cap", user.chat_id);
                    break;
                }
                self.plan_subscription(
                    &user,
                    subscription,
                    horizon_floor,
                    &mut plan,
                    &mut per_chat,
                    &mut report,
                )
                .await?;
            }
        }

        info!(
            "Dispatch plan ready: {} messages, {} articles recorded, {} lock notices",
            plan.len(),
            report.articles_recorded,
            report.lock_notices
        );
        self.transmit(plan, &mut report).await;
        Ok(report)
    }

    async fn plan_subscription(
        &self,
        user: &User,
        subscription: &Subscription,
        horizon_floor: chrono::DateTime<Utc>,
        plan: &mut Vec<OutboundMessage>,
        per_chat: &mut HashMap<String, usize>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let cursor = self
            .store
            .delivery_cursor(subscription.id, PREMIUM_LOCK_URL)
            .await?
            .unwrap_or(horizon_floor)
            .max(horizon_floor);

        let candidates = self
            .store
            .candidate_articles(
                subscription.source_id,
                cursor,
                horizon_floor,
                self.config.max_items_per_subscription,
            )
            .await?;
        if candidates.is_empty() {
            return Ok(());
        }

        // Defensive re-check against the cursor: drop anything already SENT.
        let sent = self.store.sent_urls(subscription.id).await?;
        let fresh: Vec<Article> = candidates
            .into_iter()
            .filter(|a| !sent.contains(&a.url))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let mut deliverable: Vec<(Article, String)> = Vec::new();
        for article in fresh {
            match self.pick_summary(&article, &subscription.language).await? {
                Some(text) => deliverable.push((article, text)),
                // Not recorded; still after the cursor, retried next run.
                None => debug!(
                    "No {} text for article {}, skipping this run",
                    subscription.language, article.id
                ),
            }
        }
        if deliverable.is_empty() {
            return Ok(());
        }

        if deliverable.len() < self.config.batch_threshold {
            for (article, text) in deliverable {
                let queued = per_chat.get(&user.chat_id).copied().unwrap_or(0);
                if queued >= self.config.max_messages_per_chat_per_run {
                    break;
                }
                if self
                    .store
                    .record_sent_delivery(
                        user.id,
                        subscription.id,
                        &article.title,
                        &text,
                        &article.url,
                    )
                    .await?
                {
                    report.articles_recorded += 1;
                    plan.push(OutboundMessage {
                        chat_id: user.chat_id.clone(),
                        text: render_single_message(&article.title, &text, &article.url),
                        silent: queued >= 1,
                        disable_preview: false,
                        keyboard: None,
                    });
                    per_chat.insert(user.chat_id.clone(), queued + 1);
                }
            }
        } else {
            let mut blocks: Vec<String> = Vec::new();
            for (article, text) in deliverable {
                if self
                    .store
                    .record_sent_delivery(
                        user.id,
                        subscription.id,
                        &article.title,
                        &text,
                        &article.url,
                    )
                    .await?
                {
                    report.articles_recorded += 1;
                    blocks.push(render_item_block(&article.title, &text, &article.url));
                }
            }
            if blocks.is_empty() {
                return Ok(());
            }
            let queued = per_chat.get(&user.chat_id).copied().unwrap_or(0);
            plan.push(OutboundMessage {
                chat_id: user.chat_id.clone(),
                text: blocks.join("\n\n"),
                silent: queued >= 1,
                disable_preview: true,
                keyboard: None,
            });
            per_chat.insert(user.chat_id.clone(), queued + 1);
        }
        Ok(())
    }

    /// Resolve the deliverable text for an article in the subscription's
    /// language, optionally falling back to the base-language summary.
    pub async fn pick_summary(&self, article: &Article, language: &str) -> Result<Option<String>> {
        match self.translations.get_or_translate(article, language).await? {
            Some(text) => Ok(Some(text)),
            None if self.config.fallback_to_base && language != self.translations.base_language() => {
                self.translations
                    .get_or_translate(article, self.translations.base_language())
                    .await
            }
            None => Ok(None),
        }
    }

    /// Transmission failures are logged only: the SENT records already
    /// written are never rolled back or retried.
    async fn transmit(&self, plan: Vec<OutboundMessage>, report: &mut DispatchReport) {
        for message in plan {
            match self.transport.send(&message).await {
                Ok(()) => report.messages_sent += 1,
                Err(e) => {
                    warn!("Failed to send to chat {}: {}", message.chat_id, e);
                    report.messages_failed += 1;
                }
            }
            tokio::time::sleep(self.config.pacing).await;
        }
    }
}

/// Minimal HTML escaping for message text.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escaping for attribute values inside a link tag: quotes too.
pub fn escape_attr(text: &str) -> String {
    escape_html(text)
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn clamp_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

pub fn render_single_message(title: &str, summary: &str, url: &str) -> String {
    let safe_title = escape_html(title);
    let safe_summary = escape_html(&clamp_chars(summary, 900));
    format!(
        "\u{1f195} <b>{}</b>\n{}\n\u{1f517} <a href=\"{}\">{}</a>",
        safe_title,
        safe_summary,
        escape_attr(url),
        escape_html(url)
    )
}

pub fn render_item_block(title: &str, summary: &str, url: &str) -> String {
    render_single_message(title, summary, url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_html_specials() {
        assert_eq!(escape_html("a & <b>"), "a &amp; &lt;b&gt;");
        assert_eq!(escape_attr(r#"x"y'z"#), "x&quot;y&#39;z");
    }

    #[test]
    fn single_message_escapes_and_links() {
        let text = render_single_message("R&D <beta>", "summary", "http://x/?a=1&b=2");
        assert!(text.contains("<b>R&amp;D &lt;beta&gt;</b>"));
        assert!(text.contains("href=\"http://x/?a=1&amp;b=2\""));
        assert!(!text.contains("<beta>"));
    }

    #[test]
    fn long_summaries_are_clamped() {
        let summary = "s".repeat(2000);
        let text = render_single_message("t", &summary, "http://x");
        let body_line = text.lines().nth(1).unwrap();
        assert!(body_line.chars().count() <= 900);
    }
}
