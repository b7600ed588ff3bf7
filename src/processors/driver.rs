//! Subprocess supervision for one (issue, processor) run.
//!
//! The driver prepares the agent slot's git clone and issue branch, loads
//! the prompt, spawns the processor CLI, and supervises it: stdout is
//! framed into lines concurrently (capturing the session id and the most
//! recent non-empty line), stderr is accumulated for post-mortem, and a
//! watchdog kills the child once the configured wall-clock timeout
//! elapses.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::{IssueProcessor, ProcessorBackend, extract_session_id};
use crate::config::Config;
use crate::models::{ProcessStatus, ProcessorName};
use crate::notify::NotifierSet;
use crate::process;
use crate::prompts::PromptLoader;
use crate::state::StateHandle;
use crate::workspace;

/// Result of one supervised run.
#[derive(Debug, Clone)]
pub struct DriverOutcome {
    pub status: ProcessStatus,
    pub session_id: Option<String>,
    pub last_output: Option<String>,
    pub error: Option<String>,
}

pub struct ProcessorDriver<B: ProcessorBackend> {
    backend: B,
    config: Arc<Config>,
    state: StateHandle,
    notifiers: Arc<NotifierSet>,
    prompts: Arc<PromptLoader>,
}

impl<B: ProcessorBackend> ProcessorDriver<B> {
    pub fn new(
        backend: B,
        config: Arc<Config>,
        state: StateHandle,
        notifiers: Arc<NotifierSet>,
        prompts: Arc<PromptLoader>,
    ) -> Self {
        Self {
            backend,
            config,
            state,
            notifiers,
            prompts,
        }
    }

    async fn run(
        &self,
        issue: u64,
        agent_index: u32,
        repo_name: Option<&str>,
    ) -> Result<DriverOutcome> {
        let name = self.backend.name();
        let settings = self.config.processor_settings(name).clone();

        let repo = match repo_name {
            Some(r) => self
                .config
                .repo_config(r)
                .with_context(|| format!("Repository {} not found in configuration", r))?,
            None => self
                .config
                .default_repo()
                .context("No repositories configured")?,
        };

        // Reuse the branch recorded at reservation; mint one only when the
        // entry is gone (manual state edits, legacy files).
        let branch = match self.state.with(|s| s.get(issue, name).cloned()).await {
            Some(existing) => existing.branch,
            None => workspace::issue_branch_name(
                issue,
                name,
                &workspace::branch_timestamp(Utc::now()),
            ),
        };

        let dir = workspace::ensure_clone(repo, name, agent_index).await?;
        workspace::prepare_issue_branch(&dir, &branch).await?;
        eprintln!(
            "[driver] {} working issue #{} on {} in {}",
            name,
            issue,
            branch,
            dir.display()
        );

        let prompt = self
            .prompts
            .load(name, issue, settings.prompt_path.as_deref())?;

        let mut argv = vec![settings.binary(name)];
        argv.extend(self.backend.build_args(&prompt));

        let mut child = process::spawn_process(&argv, Some(&dir), None).await?;

        let session_id: Arc<Mutex<Option<String>>> = Arc::default();
        let last_output: Arc<Mutex<Option<String>>> = Arc::default();

        let stdout = child.take_stdout().context("child stdout not piped")?;
        let stdout_task = tokio::spawn(read_stdout(
            stdout,
            issue,
            name,
            self.state.clone(),
            session_id.clone(),
            last_output.clone(),
        ));
        let stderr = child.take_stderr().context("child stderr not piped")?;
        let stderr_task = tokio::spawn(collect_stream(stderr));

        let check_interval = Duration::from_secs_f64(settings.check_interval_seconds.max(0.01));
        let timeout = Duration::from_secs_f64(settings.timeout_seconds);
        let started = Instant::now();

        let exit_code = loop {
            match tokio::time::timeout(check_interval, child.wait()).await {
                Ok(code) => break code?,
                Err(_) => {
                    if started.elapsed() >= timeout {
                        eprintln!(
                            "[driver] {} timed out on issue #{}, killing pid {:?}",
                            name,
                            issue,
                            child.id()
                        );
                        child.kill();
                        let _ = child.wait().await;
                        let _ = stdout_task.await;
                        let _ = stderr_task.await;

                        let message = format!(
                            "Process timed out after {} seconds",
                            settings.timeout_seconds
                        );
                        let last = last_output.lock().unwrap().clone();
                        self.notifiers
                            .notify_error(issue, &message, last.as_deref(), repo_name)
                            .await;
                        return Ok(DriverOutcome {
                            status: ProcessStatus::Failed,
                            session_id: session_id.lock().unwrap().clone(),
                            last_output: last,
                            error: Some(message),
                        });
                    }
                }
            }
        };

        let _ = stdout_task.await;
        let stderr_text = stderr_task.await.unwrap_or_default();
        let session = session_id.lock().unwrap().clone();
        let last = last_output.lock().unwrap().clone();

        if exit_code == 0 {
            eprintln!(
                "[driver] {} completed issue #{} (session {:?})",
                name, issue, session
            );
            return Ok(DriverOutcome {
                status: ProcessStatus::Completed,
                session_id: session,
                last_output: last,
                error: None,
            });
        }

        let message = if stderr_text.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            stderr_text.trim().to_string()
        };
        eprintln!(
            "[driver] {} failed issue #{} with exit code {}",
            name, issue, exit_code
        );
        self.notifiers
            .notify_error(issue, &message, last.as_deref(), repo_name)
            .await;
        Ok(DriverOutcome {
            status: ProcessStatus::Failed,
            session_id: session,
            last_output: last,
            error: Some(format!("Exit code {}: {}", exit_code, message)),
        })
    }
}

#[async_trait]
impl<B: ProcessorBackend> IssueProcessor for ProcessorDriver<B> {
    fn name(&self) -> ProcessorName {
        self.backend.name()
    }

    async fn process(
        &self,
        issue: u64,
        agent_index: u32,
        repo_name: Option<&str>,
    ) -> Result<DriverOutcome> {
        self.run(issue, agent_index, repo_name).await
    }
}

/// Frame stdout into trimmed lines. The first JSON object carrying a
/// session id is persisted into the state entry immediately so a crash
/// after spawn still leaves the session discoverable.
async fn read_stdout(
    stream: impl AsyncRead + Unpin,
    issue: u64,
    processor: ProcessorName,
    state: StateHandle,
    session_id: Arc<Mutex<Option<String>>>,
    last_output: Arc<Mutex<Option<String>>>,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        *last_output.lock().unwrap() = Some(trimmed.to_string());

        let already_captured = session_id.lock().unwrap().is_some();
        if already_captured {
            continue;
        }
        if let Some(sid) = extract_session_id(trimmed) {
            eprintln!(
                "[driver] captured session {} for issue #{}",
                sid, issue
            );
            *session_id.lock().unwrap() = Some(sid.clone());
            state
                .with(|s| {
                    if let Some(entry) = s.get_mut(issue, processor) {
                        entry.session_id = Some(sid);
                    }
                })
                .await;
            if let Err(e) = state.save().await {
                eprintln!("[driver] failed to persist session id: {:#}", e);
            }
        }
    }
}

/// Accumulate a stream verbatim for post-mortem reporting.
async fn collect_stream(stream: impl AsyncRead + Unpin) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut text = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        text.push_str(&line);
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GithubConfig, ProcessorSettings, ProcessorsConfig, RepoConfig};
    use crate::models::IssueState;
    use crate::notify::Notifier;
    use crate::state::StateStore;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct RecordingSink {
        errors: Mutex<Vec<(u64, String, Option<String>)>>,
    }

    #[async_trait]
    impl Notifier for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn notify_start(&self, _: u64, _: &str, _: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn notify_complete(&self, _: u64, _: &str, _: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn notify_needs_input(&self, _: u64, _: &str, _: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn notify_error(
            &self,
            issue: u64,
            error: &str,
            last_output: Option<&str>,
            _: Option<&str>,
        ) -> Result<()> {
            self.errors.lock().unwrap().push((
                issue,
                error.to_string(),
                last_output.map(|s| s.to_string()),
            ));
            Ok(())
        }
    }

    async fn sh(dir: &Path, script: &str) {
        let out = process::run_command(
            &["sh".to_string(), "-c".to_string(), script.to_string()],
            Some(dir),
            None,
        )
        .await
        .unwrap();
        assert!(out.success(), "script failed: {}\n{}", script, out.stderr);
    }

    struct Fixture {
        _root: TempDir,
        config: Arc<Config>,
        state: StateHandle,
        sink: Arc<RecordingSink>,
        prompts: Arc<PromptLoader>,
    }

    /// Build a full driver fixture: a local origin repository, a
    /// pre-cloned claude agent slot, a stub processor script, and a
    /// default prompt.
    async fn fixture(stub_script: &str, timeout_seconds: f64) -> Fixture {
        let root = TempDir::new().unwrap();

        let origin = root.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        sh(
            &origin,
            "git init -q -b main . && \
             git config user.email t@example.com && git config user.name t && \
             echo hello > README.md && git add . && git commit -qm init",
        )
        .await;

        // Pre-create the slot clone so ensure_clone takes the refresh path
        // instead of reaching for github.
        let base = root.path().join("agents");
        let slot = base.join("claude/widgets_agent_0");
        std::fs::create_dir_all(slot.parent().unwrap()).unwrap();
        sh(
            root.path(),
            &format!("git clone -q {} {}", origin.display(), slot.display()),
        )
        .await;
        sh(
            &slot,
            "git config user.email t@example.com && git config user.name t",
        )
        .await;

        let stub = root.path().join("stub-processor.sh");
        std::fs::write(&stub, stub_script).unwrap();
        sh(root.path(), "chmod +x stub-processor.sh").await;

        let prompt_dir = root.path().join("prompt-defaults");
        std::fs::create_dir_all(&prompt_dir).unwrap();
        std::fs::write(
            prompt_dir.join("claude-default.md"),
            "Work on issue ${issueNumber}.",
        )
        .unwrap();

        let config = Arc::new(Config {
            github: GithubConfig {
                token: "t".into(),
                repos: vec![RepoConfig {
                    name: "acme/widgets".into(),
                    base_repo_path: base.to_str().unwrap().into(),
                }],
                max_concurrent: 2,
            },
            processors: ProcessorsConfig {
                enabled: vec![ProcessorName::Claude],
                claude: ProcessorSettings {
                    path: Some(stub.to_str().unwrap().into()),
                    timeout_seconds,
                    check_interval_seconds: 0.05,
                    prompt_path: None,
                },
                codex: ProcessorSettings::default(),
            },
            slack: None,
            telegram: None,
        });

        let state = StateHandle::new(StateStore::new(root.path().join("state.json")));
        state
            .with(|s| {
                s.set(IssueState::reserved(
                    42,
                    ProcessorName::Claude,
                    "issue-42-claude-20250101000000".into(),
                    0,
                    Some("acme/widgets".into()),
                    Utc::now(),
                ))
            })
            .await;

        let sink = Arc::new(RecordingSink {
            errors: Mutex::new(Vec::new()),
        });
        let prompts = Arc::new(PromptLoader::new(
            root.path().join("prompt-overrides"),
            prompt_dir,
        ));

        Fixture {
            _root: root,
            config,
            state,
            sink,
            prompts,
        }
    }

    fn driver(fx: &Fixture) -> ProcessorDriver<ClaudeTestBackend> {
        ProcessorDriver::new(
            ClaudeTestBackend,
            fx.config.clone(),
            fx.state.clone(),
            Arc::new(NotifierSet::new(vec![fx.sink.clone()])),
            fx.prompts.clone(),
        )
    }

    /// Claude-shaped backend whose argv the stub script can ignore.
    struct ClaudeTestBackend;

    impl ProcessorBackend for ClaudeTestBackend {
        fn name(&self) -> ProcessorName {
            ProcessorName::Claude
        }

        fn build_args(&self, prompt: &str) -> Vec<String> {
            vec!["-p".to_string(), prompt.to_string()]
        }
    }

    #[tokio::test]
    async fn successful_run_captures_session_and_completes() {
        let fx = fixture(
            "#!/bin/sh\n\
             echo '{\"type\":\"system\",\"session_id\":\"s-42\"}'\n\
             echo 'all done'\n\
             exit 0\n",
            30.0,
        )
        .await;

        let outcome = driver(&fx).process(42, 0, Some("acme/widgets")).await.unwrap();
        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(outcome.session_id.as_deref(), Some("s-42"));
        assert_eq!(outcome.last_output.as_deref(), Some("all done"));
        assert!(outcome.error.is_none());
        assert!(fx.sink.errors.lock().unwrap().is_empty());

        // The session id was persisted into the state entry mid-run.
        let persisted = fx
            .state
            .with(|s| s.get(42, ProcessorName::Claude).cloned())
            .await
            .unwrap();
        assert_eq!(persisted.session_id.as_deref(), Some("s-42"));
    }

    #[tokio::test]
    async fn run_prepares_the_recorded_issue_branch() {
        let fx = fixture("#!/bin/sh\ngit branch --show-current\nexit 0\n", 30.0).await;
        let outcome = driver(&fx).process(42, 0, Some("acme/widgets")).await.unwrap();
        assert_eq!(outcome.status, ProcessStatus::Completed);
        assert_eq!(
            outcome.last_output.as_deref(),
            Some("issue-42-claude-20250101000000")
        );
    }

    #[tokio::test]
    async fn non_zero_exit_reports_failed_with_stderr() {
        let fx = fixture(
            "#!/bin/sh\n\
             echo '{\"session_id\":\"s-err\"}'\n\
             echo 'boom' >&2\n\
             exit 2\n",
            30.0,
        )
        .await;

        let outcome = driver(&fx).process(42, 0, Some("acme/widgets")).await.unwrap();
        assert_eq!(outcome.status, ProcessStatus::Failed);
        assert_eq!(outcome.session_id.as_deref(), Some("s-err"));
        assert!(outcome.error.as_deref().unwrap().contains("boom"));

        let errors = fx.sink.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 42);
        assert!(errors[0].1.contains("boom"));
    }

    #[tokio::test]
    async fn silent_failure_reports_unknown_error() {
        let fx = fixture("#!/bin/sh\nexit 5\n", 30.0).await;
        let outcome = driver(&fx).process(42, 0, Some("acme/widgets")).await.unwrap();
        assert_eq!(outcome.status, ProcessStatus::Failed);
        let errors = fx.sink.errors.lock().unwrap();
        assert_eq!(errors[0].1, "Unknown error");
    }

    #[tokio::test]
    async fn timeout_kills_child_and_reports_failed() {
        let fx = fixture(
            "#!/bin/sh\n\
             echo '{\"session_id\":\"t-7\"}'\n\
             sleep 30\n",
            0.3,
        )
        .await;

        let started = Instant::now();
        let outcome = driver(&fx).process(42, 0, Some("acme/widgets")).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        assert_eq!(outcome.status, ProcessStatus::Failed);
        assert_eq!(outcome.session_id.as_deref(), Some("t-7"));
        assert_eq!(
            outcome.error.as_deref(),
            Some("Process timed out after 0.3 seconds")
        );

        let errors = fx.sink.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, "Process timed out after 0.3 seconds");
        assert_eq!(errors[0].2.as_deref(), Some("{\"session_id\":\"t-7\"}"));
    }

    #[tokio::test]
    async fn missing_prompt_fails_before_spawning() {
        let fx = fixture("#!/bin/sh\nexit 0\n", 30.0).await;
        let bad_prompts = Arc::new(PromptLoader::new(
            PathBuf::from("/nonexistent/overrides"),
            PathBuf::from("/nonexistent/defaults"),
        ));
        let driver = ProcessorDriver::new(
            ClaudeTestBackend,
            fx.config.clone(),
            fx.state.clone(),
            Arc::new(NotifierSet::new(Vec::new())),
            bad_prompts,
        );
        let err = driver.process(42, 0, Some("acme/widgets")).await.unwrap_err();
        assert!(err.to_string().contains("No prompt template"));
    }

    #[tokio::test]
    async fn unknown_repo_is_an_error() {
        let fx = fixture("#!/bin/sh\nexit 0\n", 30.0).await;
        let err = driver(&fx)
            .process(42, 0, Some("acme/unknown"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found in configuration"));
    }
}
