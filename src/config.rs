//! Configuration loaded from `~/.imploid/config.json`.
//!
//! The file is human-edited or generated by the `--config` wizard. All
//! paths support `~/` home expansion. Per-processor settings live under
//! `processors.<name>` alongside the `processors.enabled` list.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::models::ProcessorName;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub github: GithubConfig,
    #[serde(default)]
    pub processors: ProcessorsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub token: String,
    #[serde(default)]
    pub repos: Vec<RepoConfig>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

/// One repository the orchestrator polls, with the directory under which
/// its per-processor agent clones are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Canonical `owner/name`.
    pub name: String,
    pub base_repo_path: String,
}

impl RepoConfig {
    /// Base path with `~/` expanded.
    pub fn base_path(&self) -> PathBuf {
        expand_tilde(&self.base_repo_path)
    }

    /// Repository name without the owner prefix.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: Vec<ProcessorName>,
    #[serde(default)]
    pub claude: ProcessorSettings,
    #[serde(default)]
    pub codex: ProcessorSettings,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            claude: ProcessorSettings::default(),
            codex: ProcessorSettings::default(),
        }
    }
}

/// Per-processor tuning. `path` defaults to the processor name itself so a
/// binary on `$PATH` needs no configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<String>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_seconds: default_timeout_seconds(),
            check_interval_seconds: default_check_interval_seconds(),
            prompt_path: None,
        }
    }
}

impl ProcessorSettings {
    /// The binary to spawn for `name`, honoring the configured override.
    pub fn binary(&self, name: ProcessorName) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| name.as_str().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub bot_token: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

fn default_max_concurrent() -> u32 {
    3
}

fn default_enabled() -> Vec<ProcessorName> {
    vec![ProcessorName::Claude]
}

fn default_timeout_seconds() -> f64 {
    3600.0
}

fn default_check_interval_seconds() -> f64 {
    5.0
}

impl Config {
    /// Load and validate configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "Configuration file not found: {}\nRun `imploid --config` to create it",
                path.display()
            );
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.imploid`, the directory holding config, state, lock, and prompts.
    pub fn imploid_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(home.join(".imploid"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::imploid_dir()?.join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.github.token.trim().is_empty() {
            bail!("github.token must not be empty");
        }
        if self.github.repos.is_empty() {
            bail!("github.repos must list at least one repository");
        }
        for repo in &self.github.repos {
            if !repo.name.contains('/') {
                bail!("Repository name '{}' must be owner/name", repo.name);
            }
        }
        if self.github.max_concurrent < 1 {
            bail!("github.max_concurrent must be at least 1");
        }
        if self.processors.enabled.is_empty() {
            bail!("processors.enabled must list at least one processor");
        }
        Ok(())
    }

    pub fn repo_config(&self, name: &str) -> Option<&RepoConfig> {
        self.github.repos.iter().find(|r| r.name == name)
    }

    /// The first configured repository, used when an issue carries no
    /// repo annotation (legacy single-repo state files).
    pub fn default_repo(&self) -> Option<&RepoConfig> {
        self.github.repos.first()
    }

    pub fn processor_settings(&self, name: ProcessorName) -> &ProcessorSettings {
        match name {
            ProcessorName::Claude => &self.processors.claude,
            ProcessorName::Codex => &self.processors.codex,
        }
    }

    /// Enabled processors, deduplicated in declaration order.
    pub fn enabled_processors(&self) -> Vec<ProcessorName> {
        let mut seen = Vec::new();
        for p in &self.processors.enabled {
            if !seen.contains(p) {
                seen.push(*p);
            }
        }
        seen
    }

    /// Create missing base repo paths; fail when one exists but is not a
    /// directory.
    pub fn ensure_base_paths(&self) -> Result<()> {
        for repo in &self.github.repos {
            let base = repo.base_path();
            if !base.exists() {
                eprintln!("[config] creating base repo path {}", base.display());
                std::fs::create_dir_all(&base)
                    .with_context(|| format!("Failed to create {}", base.display()))?;
            }
            if !base.is_dir() {
                bail!("Base repo path is not a directory: {}", base.display());
            }
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
