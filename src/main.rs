use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;

use imploid::config::Config;
use imploid::errors::LockConflict;
use imploid::github::GitHubClient;
use imploid::lockfile::LockFile;
use imploid::models::ProcessorName;
use imploid::notify::NotifierSet;
use imploid::processors;
use imploid::prompts::PromptLoader;
use imploid::runner::{DEFAULT_POLLING_INTERVAL, ForegroundRunner};
use imploid::scheduler::Scheduler;
use imploid::state::{StateHandle, StateStore};
use imploid::{install, wizard};

/// Orchestrates autonomous coding agents over GitHub issues labeled
/// `agent-ready`. With no flags, runs exactly one scheduling tick.
#[derive(Parser)]
#[command(name = "imploid", version, about)]
struct Cli {
    /// Run the configuration wizard (optionally writing to PATH), then exit
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    config: Option<Option<PathBuf>>,

    /// Install the bundled command templates, then exit
    #[arg(long)]
    install_commands: bool,

    /// Keep polling in the foreground (default cadence 60s)
    #[arg(long)]
    foreground: bool,

    /// Restrict this run to a subset of the configured processors
    #[arg(long, value_name = "NAME[,NAME...]", value_delimiter = ',')]
    processors: Option<Vec<String>>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        if let Some(conflict) = e.downcast_ref::<LockConflict>() {
            eprintln!("{} {}", style("error:").red().bold(), conflict);
        } else {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(explicit) = cli.config {
        let path = wizard::target_path(explicit)?;
        return wizard::run(&path);
    }
    if cli.install_commands {
        return install::run();
    }

    let config = Config::load(&Config::default_path()?)?;
    config.ensure_base_paths()?;

    let enabled = resolve_processors(&config, cli.processors.as_deref())?;

    let mut store = StateStore::new(StateStore::default_path()?);
    store.initialize()?;
    let state = StateHandle::new(store);

    let config = Arc::new(config);
    let tracker = Arc::new(GitHubClient::new(&config.github.token));
    let notifiers = Arc::new(NotifierSet::from_config(&config));
    let prompts = Arc::new(PromptLoader::from_home()?);
    let drivers = processors::build_processors(
        &enabled,
        config.clone(),
        state.clone(),
        notifiers.clone(),
        prompts,
    );
    let scheduler = Arc::new(Scheduler::new(
        config,
        state,
        tracker,
        notifiers,
        drivers,
    ));

    let lock = LockFile::new(LockFile::default_path()?);
    if cli.foreground {
        ForegroundRunner::new(scheduler, lock, DEFAULT_POLLING_INTERVAL)
            .start()
            .await
    } else {
        if !lock.acquire() {
            let pid = lock.holder().map(|h| h.pid).unwrap_or(0);
            return Err(LockConflict { pid }.into());
        }
        let result = scheduler.tick().await;
        lock.release();
        result
    }
}

/// The configured enabled set, optionally intersected with a `--processors`
/// override.
fn resolve_processors(
    config: &Config,
    requested: Option<&[String]>,
) -> Result<Vec<ProcessorName>> {
    let enabled = config.enabled_processors();
    let Some(requested) = requested else {
        return Ok(enabled);
    };

    let mut parsed = Vec::new();
    for raw in requested {
        let name: ProcessorName = raw
            .trim()
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Invalid --processors value")?;
        if !parsed.contains(&name) {
            parsed.push(name);
        }
    }

    let selected: Vec<ProcessorName> = parsed
        .into_iter()
        .filter(|p| enabled.contains(p))
        .collect();
    if selected.is_empty() {
        bail!(
            "--processors selects none of the enabled processors ({})",
            enabled
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imploid::config::{GithubConfig, ProcessorsConfig, RepoConfig};

    fn config_with_enabled(enabled: Vec<ProcessorName>) -> Config {
        Config {
            github: GithubConfig {
                token: "t".into(),
                repos: vec![RepoConfig {
                    name: "a/b".into(),
                    base_repo_path: "/tmp".into(),
                }],
                max_concurrent: 3,
            },
            processors: ProcessorsConfig {
                enabled,
                ..ProcessorsConfig::default()
            },
            slack: None,
            telegram: None,
        }
    }

    #[test]
    fn no_override_keeps_configured_set() {
        let config =
            config_with_enabled(vec![ProcessorName::Claude, ProcessorName::Codex]);
        assert_eq!(
            resolve_processors(&config, None).unwrap(),
            vec![ProcessorName::Claude, ProcessorName::Codex]
        );
    }

    #[test]
    fn override_intersects_with_enabled() {
        let config = config_with_enabled(vec![ProcessorName::Claude]);
        let selected =
            resolve_processors(&config, Some(&["claude".into(), "codex".into()])).unwrap();
        assert_eq!(selected, vec![ProcessorName::Claude]);
    }

    #[test]
    fn disjoint_override_is_an_error() {
        let config = config_with_enabled(vec![ProcessorName::Claude]);
        let err = resolve_processors(&config, Some(&["codex".into()])).unwrap_err();
        assert!(err.to_string().contains("none of the enabled"));
    }

    #[test]
    fn unknown_processor_name_is_an_error() {
        let config = config_with_enabled(vec![ProcessorName::Claude]);
        assert!(resolve_processors(&config, Some(&["gemini".into()])).is_err());
    }
}
