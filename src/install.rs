//! `--install-commands`: install the bundled default prompt templates
//! into `~/.imploid/prompts/` so users have editable starting points.
//! Existing files are never overwritten.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use crate::config::Config;

const TEMPLATES: &[(&str, &str)] = &[
    (
        "claude-default.md",
        include_str!("../templates/claude-default.md"),
    ),
    (
        "codex-default.md",
        include_str!("../templates/codex-default.md"),
    ),
];

pub fn run() -> Result<()> {
    let dir = Config::imploid_dir()?.join("prompts");
    install_into(&dir)
}

pub fn install_into(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    for (name, body) in TEMPLATES {
        let target = dir.join(name);
        if target.exists() {
            println!(
                "{} {} already exists, keeping your copy",
                style("-").dim(),
                target.display()
            );
            continue;
        }
        std::fs::write(&target, body)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("{} installed {}", style("✓").green().bold(), target.display());
    }
    Ok(())
}
