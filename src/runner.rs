//! Foreground polling loop: one scheduler tick immediately, then one per
//! interval, under the cross-process lock and with SIGINT/SIGTERM
//! handled as a graceful stop.
//!
//! A stop request waits for the in-flight tick. Running processor
//! children are not cancelled here: they finish or hit their own timeout,
//! since killing them mid-push could leave a remote branch half written.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use tokio::signal::unix::{SignalKind, signal};

use crate::errors::LockConflict;
use crate::lockfile::LockFile;
use crate::scheduler::Scheduler;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(60);

pub struct ForegroundRunner {
    scheduler: Arc<Scheduler>,
    lock: LockFile,
    interval: Duration,
    running: bool,
}

impl ForegroundRunner {
    pub fn new(scheduler: Arc<Scheduler>, lock: LockFile, interval: Duration) -> Self {
        Self {
            scheduler,
            lock,
            interval,
            running: false,
        }
    }

    /// Run until SIGINT or SIGTERM. Errors from individual ticks are
    /// logged and retried on the next tick; only lock conflicts and signal
    /// handler registration failures abort the run.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("Foreground runner already started");
        }
        self.running = true;

        if !self.lock.acquire() {
            self.running = false;
            let pid = self.lock.holder().map(|h| h.pid).unwrap_or(0);
            return Err(LockConflict { pid }.into());
        }

        let result = self.poll_loop().await;
        self.lock.release();
        self.running = false;
        result
    }

    async fn poll_loop(&self) -> Result<()> {
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        println!(
            "{} polling every {}s (Ctrl-C to stop)",
            style("imploid").bold().cyan(),
            self.interval.as_secs()
        );

        loop {
            if let Err(e) = self.scheduler.tick().await {
                eprintln!("[runner] tick failed: {:#}", e);
            }

            tokio::select! {
                _ = sigint.recv() => {
                    eprintln!("[runner] received SIGINT, stopping");
                    break;
                }
                _ = sigterm.recv() => {
                    eprintln!("[runner] received SIGTERM, stopping");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GithubConfig, ProcessorsConfig, RepoConfig};
    use crate::models::ProcessorName;
    use crate::notify::NotifierSet;
    use crate::processors::IssueProcessor;
    use crate::state::{StateHandle, StateStore};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct NoIssues;

    #[async_trait::async_trait]
    impl crate::github::IssueTracker for NoIssues {
        async fn list_ready_issues(
            &self,
            _repo: &str,
        ) -> Result<Vec<crate::models::Issue>, crate::errors::GitHubError> {
            Ok(Vec::new())
        }

        async fn update_labels(
            &self,
            _: u64,
            _: &[String],
            _: &[String],
            _: &str,
        ) -> Result<(), crate::errors::GitHubError> {
            Ok(())
        }

        async fn create_comment(
            &self,
            _: u64,
            _: &str,
            _: &str,
        ) -> Result<(), crate::errors::GitHubError> {
            Ok(())
        }
    }

    fn test_scheduler(root: &TempDir) -> Arc<Scheduler> {
        let config = Arc::new(Config {
            github: GithubConfig {
                token: "t".into(),
                repos: vec![RepoConfig {
                    name: "acme/widgets".into(),
                    base_repo_path: root.path().to_str().unwrap().into(),
                }],
                max_concurrent: 1,
            },
            processors: ProcessorsConfig::default(),
            slack: None,
            telegram: None,
        });
        let state = StateHandle::new(StateStore::new(root.path().join("state.json")));
        let processors: BTreeMap<ProcessorName, Arc<dyn IssueProcessor>> = BTreeMap::new();
        Arc::new(Scheduler::new(
            config,
            state,
            Arc::new(NoIssues),
            Arc::new(NotifierSet::new(Vec::new())),
            processors,
        ))
    }

    #[tokio::test]
    async fn start_fails_on_lock_conflict() {
        let root = TempDir::new().unwrap();
        let lock_path = root.path().join("imploid.lock");

        // A live holder (this process) already owns the lock.
        let holder = LockFile::new(lock_path.clone());
        assert!(holder.acquire());

        let mut runner = ForegroundRunner::new(
            test_scheduler(&root),
            LockFile::new(lock_path),
            Duration::from_secs(1),
        );
        let err = runner.start().await.unwrap_err();
        let conflict = err.downcast_ref::<LockConflict>().unwrap();
        assert_eq!(conflict.pid, std::process::id());

        holder.release();
    }

    #[tokio::test]
    async fn double_start_is_an_error() {
        let root = TempDir::new().unwrap();
        let mut runner = ForegroundRunner::new(
            test_scheduler(&root),
            LockFile::new(root.path().join("imploid.lock")),
            Duration::from_secs(1),
        );
        runner.running = true;
        let err = runner.start().await.unwrap_err();
        assert!(err.to_string().contains("already started"));
    }

    #[test]
    fn default_interval_is_sixty_seconds() {
        assert_eq!(DEFAULT_POLLING_INTERVAL, Duration::from_secs(60));
    }
}
