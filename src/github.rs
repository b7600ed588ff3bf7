//! GitHub REST adapter: discovery of ready issues, label reconciliation,
//! and issue comments.
//!
//! Labels and comments are advisory mirrors of local state; every call can
//! fail with `GitHubError` and the caller decides recoverability (usually
//! by retrying on the next scheduler tick).

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::errors::GitHubError;
use crate::models::{Issue, Label};

/// The discovery label. The historical `ready-for-claude` label is not
/// accepted.
pub const READY_LABEL: &str = "agent-ready";

const API_ROOT: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("imploid/", env!("CARGO_PKG_VERSION"));

/// Narrow interface over the issue tracker, so the scheduler can run
/// against a test double.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Open issues labeled [`READY_LABEL`], annotated with `repo`.
    async fn list_ready_issues(&self, repo: &str) -> Result<Vec<Issue>, GitHubError>;

    /// Apply removals then additions to the issue's label set. Safe to
    /// re-invoke with the same arguments.
    async fn update_labels(
        &self,
        issue: u64,
        add: &[String],
        remove: &[String],
        repo: &str,
    ) -> Result<(), GitHubError>;

    async fn create_comment(&self, issue: u64, body: &str, repo: &str)
        -> Result<(), GitHubError>;
}

/// Removals first, then additions, as a set operation over label names.
/// Returns a sorted list so repeated application is stable.
pub fn merge_labels(current: &[String], add: &[String], remove: &[String]) -> Vec<String> {
    let mut set: BTreeSet<String> = current.iter().cloned().collect();
    for label in remove {
        set.remove(label);
    }
    for label in add {
        set.insert(label.clone());
    }
    set.into_iter().collect()
}

pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    api_root: String,
}

#[derive(Debug, Deserialize)]
struct IssueLabels {
    #[serde(default)]
    labels: Vec<Label>,
}

impl GitHubClient {
    pub fn new(token: &str) -> Self {
        Self::with_api_root(token, API_ROOT)
    }

    /// Point the client at a different API root (tests).
    pub fn with_api_root(token: &str, api_root: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.to_string(),
            api_root: api_root.trim_end_matches('/').to_string(),
        }
    }

    fn issue_url(&self, repo: &str, issue: u64) -> String {
        format!("{}/repos/{}/issues/{}", self.api_root, repo, issue)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(GitHubError::Status {
                status: resp.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn list_ready_issues(&self, repo: &str) -> Result<Vec<Issue>, GitHubError> {
        let url = format!("{}/repos/{}/issues", self.api_root, repo);
        let resp = self
            .request(reqwest::Method::GET, &url)
            .query(&[("labels", READY_LABEL), ("state", "open")])
            .send()
            .await?;
        let mut issues: Vec<Issue> = Self::check(resp).await?.json().await?;
        for issue in &mut issues {
            issue.repo_name = Some(repo.to_string());
        }
        Ok(issues)
    }

    async fn update_labels(
        &self,
        issue: u64,
        add: &[String],
        remove: &[String],
        repo: &str,
    ) -> Result<(), GitHubError> {
        let resp = self
            .request(reqwest::Method::GET, &self.issue_url(repo, issue))
            .send()
            .await?;
        let current: IssueLabels = Self::check(resp).await?.json().await?;
        let names: Vec<String> = current.labels.into_iter().map(|l| l.name).collect();
        let merged = merge_labels(&names, add, remove);

        let url = format!("{}/labels", self.issue_url(repo, issue));
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&merged)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn create_comment(
        &self,
        issue: u64,
        body: &str,
        repo: &str,
    ) -> Result<(), GitHubError> {
        let url = format!("{}/comments", self.issue_url(repo, issue));
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}
