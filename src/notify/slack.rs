//! Slack sink: Block Kit messages via `chat.postMessage`.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Notifier, tail_snippet};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Snippet limits for code blocks embedded in messages.
const NEEDS_INPUT_SNIPPET: usize = 500;
const ERROR_SNIPPET: usize = 300;

pub struct SlackNotifier {
    client: reqwest::Client,
    bot_token: String,
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(bot_token: &str, channel_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
            channel_id: channel_id.to_string(),
        }
    }

    async fn send(&self, text: &str, blocks: Value) -> Result<()> {
        let resp = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.bot_token)
            .json(&json!({
                "channel": self.channel_id,
                "text": text,
                "blocks": blocks,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<PostMessageResponse>()
            .await?;
        if !resp.ok {
            bail!(
                "Slack API error: {}",
                resp.error.as_deref().unwrap_or("unknown")
            );
        }
        Ok(())
    }

    /// `<url|#n>` when the repo is known, plain `#n` otherwise.
    fn issue_link(issue: u64, repo: Option<&str>) -> String {
        match repo {
            Some(repo) => format!(
                "<https://github.com/{}/issues/{}|#{}>",
                repo, issue, issue
            ),
            None => format!("#{}", issue),
        }
    }

    fn repo_suffix(repo: Option<&str>) -> String {
        repo.map(|r| format!(" in {}", r)).unwrap_or_default()
    }

    fn section(text: String) -> Value {
        json!({
            "type": "section",
            "text": {"type": "mrkdwn", "text": text}
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify_start(&self, issue: u64, title: &str, repo: Option<&str>) -> Result<()> {
        let blocks = json!([Self::section(format!(
            ":rocket: *Started processing issue {}{}*\n{}",
            Self::issue_link(issue, repo),
            Self::repo_suffix(repo),
            title
        ))]);
        self.send(&format!("Started issue #{}: {}", issue, title), blocks)
            .await
    }

    async fn notify_complete(&self, issue: u64, duration: &str, repo: Option<&str>) -> Result<()> {
        let blocks = json!([Self::section(format!(
            ":white_check_mark: *Completed issue {}{}*\nDuration: `{}`",
            Self::issue_link(issue, repo),
            Self::repo_suffix(repo),
            duration
        ))]);
        self.send(&format!("Completed issue #{} [{}]", issue, duration), blocks)
            .await
    }

    async fn notify_needs_input(
        &self,
        issue: u64,
        output: &str,
        repo: Option<&str>,
    ) -> Result<()> {
        let snippet = tail_snippet(output, NEEDS_INPUT_SNIPPET);
        let blocks = json!([
            Self::section(format!(
                ":hourglass: *Issue {}{} needs input*",
                Self::issue_link(issue, repo),
                Self::repo_suffix(repo)
            )),
            Self::section(format!("```{}```", snippet)),
        ]);
        self.send(&format!("Issue #{} needs input", issue), blocks)
            .await
    }

    async fn notify_error(
        &self,
        issue: u64,
        error: &str,
        last_output: Option<&str>,
        repo: Option<&str>,
    ) -> Result<()> {
        let mut blocks = vec![Self::section(format!(
            ":x: *Error on issue {}{}*\n{}",
            Self::issue_link(issue, repo),
            Self::repo_suffix(repo),
            error
        ))];
        if let Some(output) = last_output {
            let snippet = tail_snippet(output, ERROR_SNIPPET);
            blocks.push(Self::section(format!(
                "*Last output:*\n```{}```",
                snippet
            )));
        }
        self.send(
            &format!("Error on issue #{}: {}", issue, error),
            Value::Array(blocks),
        )
        .await
    }
}
