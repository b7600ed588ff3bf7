//! Telegram sink: Markdown messages via the Bot API.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Notifier, tail_snippet, truncate_message};

/// Telegram rejects messages over 4096 chars; stay under with headroom.
const MAX_MESSAGE: usize = 4000;

pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }

    async fn send(&self, message: &str) -> Result<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token
        );
        let text = truncate_message(message, MAX_MESSAGE);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?
            .json::<SendMessageResponse>()
            .await?;
        if !resp.ok {
            bail!(
                "Telegram API error: {}",
                resp.description.as_deref().unwrap_or("unknown")
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn notify_start(&self, issue: u64, title: &str, _repo: Option<&str>) -> Result<()> {
        self.send(&format!("🚀 *Started issue #{}*: {}", issue, title))
            .await
    }

    async fn notify_complete(
        &self,
        issue: u64,
        duration: &str,
        _repo: Option<&str>,
    ) -> Result<()> {
        self.send(&format!("✅ *Completed issue #{}* [{}]", issue, duration))
            .await
    }

    async fn notify_needs_input(
        &self,
        issue: u64,
        output: &str,
        _repo: Option<&str>,
    ) -> Result<()> {
        let snippet = tail_snippet(output, 1000);
        self.send(&format!(
            "⏳ *Issue #{} needs input*:\n```\n{}\n```",
            issue, snippet
        ))
        .await
    }

    async fn notify_error(
        &self,
        issue: u64,
        error: &str,
        last_output: Option<&str>,
        _repo: Option<&str>,
    ) -> Result<()> {
        let mut message = format!("❌ *Error on issue #{}*:\n{}", issue, error);
        if let Some(output) = last_output {
            let snippet = tail_snippet(output, 500);
            message.push_str(&format!("\n\nLast output:\n```\n{}\n```", snippet));
        }
        self.send(&message).await
    }
}
