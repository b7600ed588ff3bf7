//! Typed error hierarchy for the imploid orchestrator.
//!
//! Each type covers one subsystem boundary:
//! - `GitHubError` — REST calls; recoverable by retrying on the next tick
//! - `GitError` — clone/checkout/reset failures in an agent workspace
//! - `ProcessError` — subprocess spawn, timeout, and exit-code failures
//! - `PromptNotFound` — prompt template resolution
//! - `LockConflict` — another instance holds the cross-process lock

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the GitHub REST adapter.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API error: {status}")]
    Status { status: u16 },

    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl GitHubError {
    /// The HTTP status behind this error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Status { status } => Some(*status),
            GitHubError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// A git command failed while preparing an agent workspace.
#[derive(Debug, Error)]
#[error("git {step} failed: {stderr}")]
pub struct GitError {
    pub step: String,
    pub stderr: String,
}

impl GitError {
    pub fn new(step: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stderr: String = stderr.into();
        Self {
            step: step.into(),
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Errors from subprocess supervision.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process timed out after {seconds} seconds")]
    Timeout { seconds: f64 },

    #[error("Process exited with non-zero code {code}")]
    NonZeroExit { code: i32, stderr: String },
}

/// No prompt template could be resolved for a processor.
#[derive(Debug, Error)]
#[error("No prompt template found for {name} (searched {candidates:?})")]
pub struct PromptNotFound {
    pub name: String,
    pub candidates: Vec<PathBuf>,
}

/// Another imploid instance already holds the lock file.
#[derive(Debug, Error)]
#[error("Another imploid instance is already running (pid {pid})")]
pub struct LockConflict {
    pub pid: u32,
}
