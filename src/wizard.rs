//! Interactive configuration wizard behind `imploid --config`.
//!
//! Walks through GitHub credentials, repositories, processor selection,
//! and optional notification sinks, then writes the config JSON. Existing
//! values are offered as defaults so the wizard doubles as an editor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, MultiSelect};

use crate::config::{
    Config, GithubConfig, ProcessorsConfig, RepoConfig, SlackConfig, TelegramConfig,
};
use crate::models::ProcessorName;

/// Run the wizard and write the resulting configuration to `path`.
pub fn run(path: &Path) -> Result<()> {
    println!(
        "{} configuration wizard, writing {}",
        style("imploid").bold().cyan(),
        path.display()
    );

    let existing = if path.exists() {
        Config::load(path).ok()
    } else {
        None
    };

    let token: String = Input::new()
        .with_prompt("GitHub personal access token")
        .with_initial_text(
            existing
                .as_ref()
                .map(|c| c.github.token.clone())
                .unwrap_or_default(),
        )
        .interact_text()?;

    let mut repos = Vec::new();
    loop {
        let name: String = Input::new()
            .with_prompt("Repository (owner/name)")
            .validate_with(|input: &String| {
                if input.contains('/') {
                    Ok(())
                } else {
                    Err("must be owner/name")
                }
            })
            .interact_text()?;
        let base_repo_path: String = Input::new()
            .with_prompt("Base path for this repo's agent clones")
            .default("~/imploid-agents".to_string())
            .interact_text()?;
        repos.push(RepoConfig {
            name,
            base_repo_path,
        });
        if !Confirm::new()
            .with_prompt("Add another repository?")
            .default(false)
            .interact()?
        {
            break;
        }
    }

    let max_concurrent: u32 = Input::new()
        .with_prompt("Maximum concurrent issues")
        .default(3)
        .interact_text()?;

    let choices = ProcessorName::ALL;
    let labels: Vec<&str> = choices.iter().map(|p| p.display_name()).collect();
    let defaults: Vec<bool> = choices
        .iter()
        .map(|p| {
            existing
                .as_ref()
                .map(|c| c.processors.enabled.contains(p))
                .unwrap_or(*p == ProcessorName::Claude)
        })
        .collect();
    let picked = MultiSelect::new()
        .with_prompt("Enabled processors (space to toggle)")
        .items(&labels)
        .defaults(&defaults)
        .interact()?;
    let enabled: Vec<ProcessorName> = if picked.is_empty() {
        vec![ProcessorName::Claude]
    } else {
        picked.into_iter().map(|i| choices[i]).collect()
    };

    let slack = if Confirm::new()
        .with_prompt("Configure Slack notifications?")
        .default(existing.as_ref().map(|c| c.slack.is_some()).unwrap_or(false))
        .interact()?
    {
        Some(SlackConfig {
            bot_token: Input::new().with_prompt("Slack bot token").interact_text()?,
            channel_id: Input::new()
                .with_prompt("Slack channel id")
                .interact_text()?,
        })
    } else {
        None
    };

    let telegram = if Confirm::new()
        .with_prompt("Configure Telegram notifications?")
        .default(
            existing
                .as_ref()
                .map(|c| c.telegram.is_some())
                .unwrap_or(false),
        )
        .interact()?
    {
        Some(TelegramConfig {
            bot_token: Input::new()
                .with_prompt("Telegram bot token")
                .interact_text()?,
            chat_id: Input::new().with_prompt("Telegram chat id").interact_text()?,
        })
    } else {
        None
    };

    let mut processors = existing
        .map(|c| c.processors)
        .unwrap_or_else(ProcessorsConfig::default);
    processors.enabled = enabled;

    let config = Config {
        github: GithubConfig {
            token,
            repos,
            max_concurrent,
        },
        processors,
        slack,
        telegram,
    };
    config.validate()?;
    write_config(path, &config)?;

    println!(
        "{} configuration saved to {}",
        style("✓").green().bold(),
        path.display()
    );
    Ok(())
}

pub fn write_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(config)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Resolve the wizard's target: an explicit path, or the default location.
pub fn target_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Config::default_path(),
    }
}
