use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::types::{PipelineError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn single_button(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            inline_keyboard: vec![vec![InlineButton {
                text: text.into(),
                callback_data: callback_data.into(),
            }]],
        }
    }
}

/// A fully rendered message queued for transmission. Text is HTML-escaped
/// by the dispatcher before it gets here.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub silent: bool,
    pub disable_preview: bool,
    pub keyboard: Option<InlineKeyboard>,
}

/// Chat-platform send seam. The production impl talks to the Telegram Bot
/// API; tests capture messages instead.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

pub struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(PipelineError::Config("Telegram bot token is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(PipelineError::Http)?;
        Ok(Self {
            client,
            api_base: "https://api.telegram.org".to_string(),
            token,
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "text": message.text,
            "parse_mode": "HTML",
            "disable_notification": message.silent,
            "disable_web_page_preview": message.disable_preview,
        });
        if let Some(keyboard) = &message.keyboard {
            body["reply_markup"] = serde_json::to_value(keyboard)?;
        }
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_base, self.token))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::General(format!(
                "sendMessage failed with HTTP {}",
                response.status()
            )));
        }
        debug!("Sent message to chat {}", message.chat_id);
        Ok(())
    }
}
