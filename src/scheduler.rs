//! Scheduling and reconciliation: one tick discovers ready issues,
//! reserves agent slots under the concurrency cap, fans each reserved
//! issue out across the enabled processors, and reconciles GitHub labels
//! with the resulting state transitions.
//!
//! Slot reservation is all-or-nothing per issue: if any enabled processor
//! cannot yield a free slot the issue is skipped whole, so a fanned-out
//! issue never starts with only part of its processors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::config::Config;
use crate::github::{IssueTracker, READY_LABEL};
use crate::models::{Issue, IssueState, ProcessStatus, ProcessorName};
use crate::notify::NotifierSet;
use crate::processors::IssueProcessor;
use crate::state::StateHandle;
use crate::workspace;

pub struct Scheduler {
    config: Arc<Config>,
    state: StateHandle,
    tracker: Arc<dyn IssueTracker>,
    notifiers: Arc<NotifierSet>,
    processors: BTreeMap<ProcessorName, Arc<dyn IssueProcessor>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        state: StateHandle,
        tracker: Arc<dyn IssueTracker>,
        notifiers: Arc<NotifierSet>,
        processors: BTreeMap<ProcessorName, Arc<dyn IssueProcessor>>,
    ) -> Self {
        Self {
            config,
            state,
            tracker,
            notifiers,
            processors,
        }
    }

    /// One pass: discover → reserve → launch → reconcile.
    pub async fn tick(&self) -> Result<()> {
        let candidates = self.discover().await;

        let max_concurrent = self.config.github.max_concurrent;
        let active = self.state.with(|s| s.active_issue_numbers()).await;
        let mut remaining = max_concurrent.saturating_sub(active.len() as u32);
        if remaining == 0 {
            eprintln!(
                "[scheduler] all {} slots busy, nothing to reserve",
                max_concurrent
            );
            self.state.save().await?;
            return Ok(());
        }

        let reserved = self
            .reserve(candidates, &active, &mut remaining, max_concurrent)
            .await?;

        // Launch every reserved issue; each issue runs its processors in
        // parallel, and issues run in parallel with each other.
        join_all(reserved.iter().map(|issue| self.run_issue(issue))).await;

        self.state.save().await?;
        Ok(())
    }

    /// List ready issues across all configured repos, tolerating per-repo
    /// failures.
    async fn discover(&self) -> Vec<Issue> {
        let mut candidates = Vec::new();
        for repo in &self.config.github.repos {
            match self.tracker.list_ready_issues(&repo.name).await {
                Ok(mut issues) => {
                    eprintln!(
                        "[scheduler] found {} ready issues in {}",
                        issues.len(),
                        repo.name
                    );
                    candidates.append(&mut issues);
                }
                Err(e) => {
                    eprintln!("[scheduler] failed to list issues in {}: {}", repo.name, e);
                }
            }
        }
        candidates
    }

    /// Reserve slots for candidates in server order until capacity runs
    /// out. Each accepted issue gets one entry per enabled processor,
    /// inserted together and persisted before any launch.
    async fn reserve(
        &self,
        candidates: Vec<Issue>,
        active: &BTreeSet<u64>,
        remaining: &mut u32,
        max_concurrent: u32,
    ) -> Result<Vec<Issue>> {
        let mut reserved: Vec<Issue> = Vec::new();
        let mut taken: BTreeSet<u64> = active.clone();

        for issue in candidates {
            if *remaining == 0 {
                break;
            }
            // An issue counts once, whatever processor set it runs under.
            if taken.contains(&issue.number) {
                continue;
            }

            let ok = self
                .state
                .with(|store| {
                    let mut slots = Vec::new();
                    for name in self.processors.keys() {
                        match store.available_agent_index(*name, max_concurrent) {
                            Some(index) => slots.push((*name, index)),
                            None => return false,
                        }
                    }
                    let now = Utc::now();
                    for (name, index) in slots {
                        let branch = workspace::issue_branch_name(
                            issue.number,
                            name,
                            &workspace::branch_timestamp(now),
                        );
                        store.set(IssueState::reserved(
                            issue.number,
                            name,
                            branch,
                            index,
                            issue.repo_name.clone(),
                            now,
                        ));
                    }
                    true
                })
                .await;

            if !ok {
                eprintln!(
                    "[scheduler] no free agent slot for issue #{}, skipping",
                    issue.number
                );
                continue;
            }

            self.state.save().await?;
            taken.insert(issue.number);
            *remaining -= 1;
            reserved.push(issue);
        }
        Ok(reserved)
    }

    async fn run_issue(&self, issue: &Issue) {
        join_all(
            self.processors
                .values()
                .map(|processor| self.run_processor_pipeline(issue, processor.clone())),
        )
        .await;
    }

    /// Full pipeline for one (issue, processor): pre-run labels, start
    /// notification, driver, state update, terminal reconciliation. Any
    /// escaping error is converted into the failed reconciliation.
    async fn run_processor_pipeline(&self, issue: &Issue, processor: Arc<dyn IssueProcessor>) {
        let name = processor.name();
        if let Err(e) = self.drive(issue, processor).await {
            eprintln!(
                "[scheduler] issue #{} {} pipeline failed: {:#}",
                issue.number, name, e
            );
            let repo = self.repo_for(issue);
            self.notifiers
                .notify_error(issue.number, &format!("{:#}", e), None, repo.as_deref())
                .await;
            if let Some(repo) = repo {
                if let Err(label_err) = self
                    .tracker
                    .update_labels(
                        issue.number,
                        &[name.failed_label()],
                        &[name.working_label(), READY_LABEL.to_string()],
                        &repo,
                    )
                    .await
                {
                    eprintln!(
                        "[scheduler] failed to set {} on #{}: {}",
                        name.failed_label(),
                        issue.number,
                        label_err
                    );
                }
            }
            self.state.with(|s| s.remove(issue.number, name)).await;
            if let Err(save_err) = self.state.save().await {
                eprintln!("[scheduler] failed to persist state: {:#}", save_err);
            }
        }
    }

    async fn drive(&self, issue: &Issue, processor: Arc<dyn IssueProcessor>) -> Result<()> {
        let name = processor.name();
        let repo = self
            .repo_for(issue)
            .context("No repository configured for issue")?;

        self.tracker
            .update_labels(
                issue.number,
                &[name.working_label()],
                &[
                    READY_LABEL.to_string(),
                    name.completed_label(),
                    name.failed_label(),
                ],
                &repo,
            )
            .await?;

        self.notifiers
            .notify_start(
                issue.number,
                &format!("[{}] {}", processor.display_name(), issue.title),
                Some(&repo),
            )
            .await;

        let agent_index = self
            .state
            .with(|s| s.get(issue.number, name).map(|st| st.agent_index))
            .await
            .context("State entry missing at launch")?;

        let outcome = processor
            .process(issue.number, agent_index, Some(&repo))
            .await?;

        let end_time = Utc::now();
        let updated = self
            .state
            .with(|s| {
                let entry = s.get_mut(issue.number, name)?;
                if entry.session_id.is_none() {
                    entry.session_id = outcome.session_id.clone();
                }
                entry.status = outcome.status;
                entry.end_time = Some(end_time);
                if outcome.last_output.is_some() {
                    entry.last_output = outcome.last_output.clone();
                }
                if outcome.error.is_some() {
                    entry.error = outcome.error.clone();
                }
                Some(entry.clone())
            })
            .await;
        self.state.save().await?;

        match outcome.status {
            ProcessStatus::Completed => {
                let duration = updated
                    .as_ref()
                    .map(|st| format_duration(st.start_time, end_time))
                    .unwrap_or_else(|| "0m 0s".to_string());
                self.notifiers
                    .notify_complete(issue.number, &duration, Some(&repo))
                    .await;
                self.tracker
                    .update_labels(
                        issue.number,
                        &[name.completed_label()],
                        &[name.working_label()],
                        &repo,
                    )
                    .await?;
                self.state.with(|s| s.remove(issue.number, name)).await;
                self.state.save().await?;
            }
            ProcessStatus::NeedsInput => {
                // Awaiting a human: keep the entry, occupy the slot.
                let output = updated
                    .as_ref()
                    .and_then(|st| st.last_output.clone())
                    .unwrap_or_else(|| "No output available".to_string());
                self.notifiers
                    .notify_needs_input(issue.number, &output, Some(&repo))
                    .await;
            }
            ProcessStatus::Failed | ProcessStatus::Pending | ProcessStatus::Running => {
                self.tracker
                    .update_labels(
                        issue.number,
                        &[name.failed_label()],
                        &[name.working_label(), READY_LABEL.to_string()],
                        &repo,
                    )
                    .await?;
                self.state.with(|s| s.remove(issue.number, name)).await;
                self.state.save().await?;
            }
        }
        Ok(())
    }

    fn repo_for(&self, issue: &Issue) -> Option<String> {
        issue
            .repo_name
            .clone()
            .or_else(|| self.config.default_repo().map(|r| r.name.clone()))
    }
}

/// `<m>m <s>s` from the rounded wall-clock duration.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let millis = (end - start).num_milliseconds().max(0);
    let total_seconds = (millis + 500) / 1000;
    format!("{}m {}s", total_seconds / 60, total_seconds % 60)
}
