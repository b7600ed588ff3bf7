//! Notification fanout: typed events broadcast to zero or more sinks.
//!
//! A failing sink logs and never propagates; notifications are best-effort
//! side channels, not part of the state machine.

mod slack;
mod telegram;

pub use slack::SlackNotifier;
pub use telegram::TelegramNotifier;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;

use crate::config::Config;

/// One notification sink. Sinks that have no use for the repository name
/// simply ignore it.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify_start(&self, issue: u64, title: &str, repo: Option<&str>) -> Result<()>;

    async fn notify_complete(&self, issue: u64, duration: &str, repo: Option<&str>) -> Result<()>;

    async fn notify_needs_input(&self, issue: u64, output: &str, repo: Option<&str>)
        -> Result<()>;

    async fn notify_error(
        &self,
        issue: u64,
        error: &str,
        last_output: Option<&str>,
        repo: Option<&str>,
    ) -> Result<()>;
}

/// All configured sinks. Every broadcast runs the sinks in parallel and
/// swallows individual failures.
pub struct NotifierSet {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut sinks: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(telegram) = &config.telegram {
            sinks.push(Arc::new(TelegramNotifier::new(
                &telegram.bot_token,
                &telegram.chat_id,
            )));
        }
        if let Some(slack) = &config.slack {
            sinks.push(Arc::new(SlackNotifier::new(
                &slack.bot_token,
                &slack.channel_id,
            )));
        }
        Self { sinks }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn notify_start(&self, issue: u64, title: &str, repo: Option<&str>) {
        join_all(self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.notify_start(issue, title, repo).await {
                eprintln!("[notify] {} start notification failed: {:#}", sink.name(), e);
            }
        }))
        .await;
    }

    pub async fn notify_complete(&self, issue: u64, duration: &str, repo: Option<&str>) {
        join_all(self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.notify_complete(issue, duration, repo).await {
                eprintln!(
                    "[notify] {} completion notification failed: {:#}",
                    sink.name(),
                    e
                );
            }
        }))
        .await;
    }

    pub async fn notify_needs_input(&self, issue: u64, output: &str, repo: Option<&str>) {
        join_all(self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.notify_needs_input(issue, output, repo).await {
                eprintln!(
                    "[notify] {} needs-input notification failed: {:#}",
                    sink.name(),
                    e
                );
            }
        }))
        .await;
    }

    pub async fn notify_error(
        &self,
        issue: u64,
        error: &str,
        last_output: Option<&str>,
        repo: Option<&str>,
    ) {
        join_all(self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.notify_error(issue, error, last_output, repo).await {
                eprintln!("[notify] {} error notification failed: {:#}", sink.name(), e);
            }
        }))
        .await;
    }
}

/// Keep the first `max` characters, marking the cut. Telegram-style.
pub(crate) fn truncate_message(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}\n... (truncated)", head)
}

/// Keep the last `max` characters of a snippet, marking the cut.
pub(crate) fn tail_snippet(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("{} … (truncated)", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakySink {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for FlakySink {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn notify_start(&self, issue: u64, title: &str, _repo: Option<&str>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("start {} {}", issue, title));
            if self.fail {
                anyhow::bail!("sink down");
            }
            Ok(())
        }

        async fn notify_complete(
            &self,
            issue: u64,
            duration: &str,
            _repo: Option<&str>,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("complete {} {}", issue, duration));
            Ok(())
        }

        async fn notify_needs_input(
            &self,
            issue: u64,
            _output: &str,
            _repo: Option<&str>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(format!("needs {}", issue));
            Ok(())
        }

        async fn notify_error(
            &self,
            issue: u64,
            error: &str,
            _last_output: Option<&str>,
            _repo: Option<&str>,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("error {} {}", issue, error));
            if self.fail {
                anyhow::bail!("sink down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn fanout_reaches_all_sinks_and_swallows_failures() {
        let ok = Arc::new(FlakySink {
            calls: Mutex::new(Vec::new()),
            fail: false,
        });
        let bad = Arc::new(FlakySink {
            calls: Mutex::new(Vec::new()),
            fail: true,
        });
        let set = NotifierSet::new(vec![ok.clone(), bad.clone()]);

        // A failing sink must not poison the broadcast.
        set.notify_start(42, "[Claude] Add feature", Some("acme/widgets"))
            .await;
        set.notify_error(42, "boom", None, None).await;

        assert_eq!(ok.calls.lock().unwrap().len(), 2);
        assert_eq!(bad.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_set_broadcasts_are_noops() {
        let set = NotifierSet::new(Vec::new());
        assert!(set.is_empty());
        set.notify_complete(1, "0m 5s", None).await;
    }

    #[test]
    fn truncate_message_marks_the_cut() {
        assert_eq!(truncate_message("short", 10), "short");
        let long = "x".repeat(20);
        let cut = truncate_message(&long, 10);
        assert!(cut.starts_with("xxxxxxxxxx"));
        assert!(cut.ends_with("... (truncated)"));
    }

    #[test]
    fn tail_snippet_keeps_the_end() {
        assert_eq!(tail_snippet("short", 10), "short");
        let cut = tail_snippet("abcdefghij", 4);
        assert!(cut.starts_with("ghij"));
        assert!(cut.ends_with("… (truncated)"));
    }

    #[test]
    fn truncation_is_char_safe() {
        let text = "héllo wörld".repeat(100);
        let _ = truncate_message(&text, 7);
        let _ = tail_snippet(&text, 7);
    }
}
