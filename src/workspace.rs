//! Git workspace management for agent slots.
//!
//! Every (processor, agent slot, repository) triple owns one clone at
//! `<base_repo_path>/<processor>/<short_repo>_agent_<index>`. Before a
//! pipeline runs, the clone is refreshed to the remote default branch,
//! forced clean, and switched onto the issue branch.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::RepoConfig;
use crate::errors::GitError;
use crate::models::ProcessorName;
use crate::process::{self, CommandOutput};

/// The clone directory for one agent slot.
pub fn slot_dir(repo: &RepoConfig, processor: ProcessorName, agent_index: u32) -> PathBuf {
    repo.base_path()
        .join(processor.as_str())
        .join(format!("{}_agent_{}", repo.short_name(), agent_index))
}

/// Timestamp component for issue branch names.
pub fn branch_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Branch name `issue-<n>-<processor>-<14-digit-timestamp>`. The timestamp
/// component is digit-sanitized and padded or truncated to exactly 14.
pub fn issue_branch_name(issue: u64, processor: ProcessorName, timestamp: &str) -> String {
    let mut digits: String = timestamp.chars().filter(char::is_ascii_digit).collect();
    digits.truncate(14);
    while digits.len() < 14 {
        digits.push('0');
    }
    format!("issue-{}-{}-{}", issue, processor, digits)
}

async fn git(cwd: Option<&Path>, args: &[&str]) -> Result<CommandOutput> {
    let mut argv = vec!["git".to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    Ok(process::run_command(&argv, cwd, None).await?)
}

async fn git_ok(cwd: &Path, step: &str, args: &[&str]) -> Result<CommandOutput> {
    let out = git(Some(cwd), args).await?;
    if !out.success() {
        return Err(GitError::new(step, out.stderr).into());
    }
    Ok(out)
}

/// Ensure the slot clone exists and is fresh and clean. Returns its path.
///
/// Absent directory: `git clone git@github.com:<repo>.git`. Existing
/// directory: checkout the default branch, fetch, and pull. Either way a
/// dirty worktree is reset hard and cleaned, and `setup.sh` is run
/// best-effort when present.
pub async fn ensure_clone(
    repo: &RepoConfig,
    processor: ProcessorName,
    agent_index: u32,
) -> Result<PathBuf> {
    let dir = slot_dir(repo, processor, agent_index);
    if dir.exists() {
        eprintln!(
            "[workspace] refreshing {} slot {} at {}",
            processor,
            agent_index,
            dir.display()
        );
        refresh(&dir).await?;
    } else {
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        eprintln!(
            "[workspace] cloning {} for {} slot {} into {}",
            repo.name,
            processor,
            agent_index,
            dir.display()
        );
        let url = format!("git@github.com:{}.git", repo.name);
        let out = git(None, &["clone", &url, &dir.to_string_lossy()]).await?;
        if !out.success() {
            return Err(GitError::new("clone", out.stderr).into());
        }
    }

    enforce_clean(&dir).await?;
    run_setup_script(&dir).await;
    Ok(dir)
}

/// Checkout the default branch (`main`, falling back to `master`) and pull
/// the latest from origin.
async fn refresh(dir: &Path) -> Result<()> {
    let branch = checkout_default_branch(dir).await?;
    git_ok(dir, "fetch", &["fetch", "origin"]).await?;
    git_ok(dir, "pull", &["pull", "origin", &branch]).await?;
    Ok(())
}

async fn checkout_default_branch(dir: &Path) -> Result<String> {
    let main = git(Some(dir), &["checkout", "main"]).await?;
    if main.success() {
        return Ok("main".to_string());
    }
    let master = git(Some(dir), &["checkout", "master"]).await?;
    if master.success() {
        return Ok("master".to_string());
    }
    Err(GitError::new("checkout", master.stderr).into())
}

/// If the worktree is dirty, reset hard and remove untracked files.
async fn enforce_clean(dir: &Path) -> Result<()> {
    let status = git_ok(dir, "status", &["status", "--porcelain"]).await?;
    if !status.stdout.trim().is_empty() {
        eprintln!(
            "[workspace] worktree at {} is dirty, resetting",
            dir.display()
        );
        git_ok(dir, "reset", &["reset", "--hard"]).await?;
        git_ok(dir, "clean", &["clean", "-fd"]).await?;
    }
    Ok(())
}

/// Run `setup.sh` when the repository provides one. A failing script is a
/// warning, not a pipeline failure.
async fn run_setup_script(dir: &Path) {
    if !dir.join("setup.sh").exists() {
        return;
    }
    let chmod = process::run_command(
        &["chmod".to_string(), "+x".to_string(), "setup.sh".to_string()],
        Some(dir),
        None,
    )
    .await;
    if let Err(e) = chmod {
        eprintln!("[workspace] chmod +x setup.sh failed: {}", e);
        return;
    }
    match process::run_command(&["./setup.sh".to_string()], Some(dir), None).await {
        Ok(out) if out.success() => {
            eprintln!("[workspace] setup.sh completed in {}", dir.display());
        }
        Ok(out) => {
            eprintln!(
                "[workspace] setup.sh exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            );
        }
        Err(e) => eprintln!("[workspace] setup.sh failed to start: {}", e),
    }
}

/// Reset the default branch to its origin state and clean the worktree.
/// Returns the branch name.
pub async fn prepare_default_branch(dir: &Path) -> Result<String> {
    let branch = checkout_default_branch(dir).await?;
    let origin_ref = format!("origin/{}", branch);
    let reset = git(Some(dir), &["reset", "--hard", &origin_ref]).await?;
    if !reset.success() {
        // No origin tracking ref (e.g. a local-only repository): plain reset.
        git_ok(dir, "reset", &["reset", "--hard"]).await?;
    }
    git_ok(dir, "clean", &["clean", "-fd"]).await?;
    Ok(branch)
}

/// Starting from the freshly-reset default branch, create or reset the
/// issue branch and verify the worktree ends clean on that branch.
pub async fn prepare_issue_branch(dir: &Path, branch: &str) -> Result<()> {
    prepare_default_branch(dir).await?;
    git_ok(dir, "checkout", &["checkout", "-B", branch]).await?;

    let current = git_ok(dir, "branch", &["branch", "--show-current"]).await?;
    if current.stdout.trim() != branch {
        return Err(GitError::new(
            "checkout",
            format!(
                "expected branch {}, got {}",
                branch,
                current.stdout.trim()
            ),
        )
        .into());
    }
    let status = git_ok(dir, "status", &["status", "--porcelain"]).await?;
    if !status.stdout.trim().is_empty() {
        return Err(GitError::new("status", "worktree not clean after branch preparation").into());
    }
    Ok(())
}
