//! Core data model: processing statuses, the processor set, and the
//! per-(issue, processor) state record that survives restarts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one (issue, processor) pipeline.
///
/// Only `Running` and `NeedsInput` count as active for slot accounting.
/// `NeedsInput` is reserved: the store persists and surfaces it, but no
/// driver path currently produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Pending,
    Running,
    NeedsInput,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::NeedsInput => "needs_input",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether this status occupies an agent slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::NeedsInput)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "needs_input" => Ok(Self::NeedsInput),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid process status: {}", s)),
        }
    }
}

/// The closed set of coding-agent backends. Extending it means adding a
/// processor driver, not just a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorName {
    Claude,
    Codex,
}

impl ProcessorName {
    pub const ALL: [ProcessorName; 2] = [ProcessorName::Claude, ProcessorName::Codex];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }

    /// Human-facing name used in notification titles.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
        }
    }

    pub fn working_label(self) -> String {
        format!("{}-working", self.as_str())
    }

    pub fn completed_label(self) -> String {
        format!("{}-completed", self.as_str())
    }

    pub fn failed_label(self) -> String {
        format!("{}-failed", self.as_str())
    }
}

impl fmt::Display for ProcessorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            _ => Err(format!(
                "Invalid processor '{}'. Valid values: claude, codex",
                s
            )),
        }
    }
}

/// State of one (issue, processor) pipeline, the unit of persistence.
///
/// `issue_number` and `processor` are carried in memory but serialized as
/// part of the state-file key, not the value.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueState {
    pub issue_number: u64,
    pub processor: ProcessorName,
    pub status: ProcessStatus,
    pub branch: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub agent_index: u32,
    pub repo_name: Option<String>,
    pub session_id: Option<String>,
    pub last_output: Option<String>,
    pub error: Option<String>,
}

impl IssueState {
    /// A fresh `running` entry created at slot reservation.
    pub fn reserved(
        issue_number: u64,
        processor: ProcessorName,
        branch: String,
        agent_index: u32,
        repo_name: Option<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            issue_number,
            processor,
            status: ProcessStatus::Running,
            branch,
            start_time,
            end_time: None,
            agent_index,
            repo_name,
            session_id: None,
            last_output: None,
            error: None,
        }
    }
}

/// A GitHub issue as returned by the issues endpoint, annotated with the
/// repository it was discovered in.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub html_url: String,
    /// Canonical `owner/name`, filled in by the adapter after fetching.
    #[serde(skip)]
    pub repo_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}
