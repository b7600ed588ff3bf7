//! Prompt template resolution with override precedence and caching.
//!
//! Resolution order for a processor with an optional `prompt_path`
//! override:
//! 1. absolute or `~/`-prefixed override: that exact file (`.md` appended
//!    when the path has no extension);
//! 2. relative override: `~/.imploid/prompts/<override>.md`, then the
//!    installed defaults directory;
//! 3. no override: `<processor>-default.md` in the same two roots.
//!
//! Templates are cached by absolute path for the process lifetime; the
//! only substitution is the literal `${issueNumber}` token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;

use crate::config::{Config, expand_tilde};
use crate::errors::PromptNotFound;
use crate::models::ProcessorName;

pub const ISSUE_NUMBER_TOKEN: &str = "${issueNumber}";

pub struct PromptLoader {
    override_dir: PathBuf,
    defaults_dir: PathBuf,
    cache: Mutex<HashMap<PathBuf, String>>,
}

impl PromptLoader {
    pub fn new(override_dir: PathBuf, defaults_dir: PathBuf) -> Self {
        Self {
            override_dir,
            defaults_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Standard layout: user overrides under `~/.imploid/prompts`, packaged
    /// defaults next to the executable.
    pub fn from_home() -> Result<Self> {
        let override_dir = Config::imploid_dir()?.join("prompts");
        let defaults_dir = installed_defaults_dir();
        Ok(Self::new(override_dir, defaults_dir))
    }

    /// Resolve, read, and substitute the prompt for `(processor, issue)`.
    pub fn load(
        &self,
        processor: ProcessorName,
        issue: u64,
        override_path: Option<&str>,
    ) -> Result<String> {
        let (name, candidates) = self.candidates(processor, override_path);
        for candidate in &candidates {
            match self.read_cached(candidate) {
                Some(template) => {
                    return Ok(substitute_issue_number(&template, issue));
                }
                None => continue,
            }
        }
        Err(PromptNotFound { name, candidates }.into())
    }

    fn candidates(
        &self,
        processor: ProcessorName,
        override_path: Option<&str>,
    ) -> (String, Vec<PathBuf>) {
        match override_path {
            Some(raw) if raw.starts_with('/') || raw.starts_with("~/") || raw == "~" => {
                (raw.to_string(), vec![with_md_extension(expand_tilde(raw))])
            }
            Some(raw) => {
                let file = with_md_extension(PathBuf::from(raw));
                (
                    raw.to_string(),
                    vec![self.override_dir.join(&file), self.defaults_dir.join(&file)],
                )
            }
            None => {
                let name = format!("{}-default", processor);
                let file = format!("{}.md", name);
                (
                    name,
                    vec![self.override_dir.join(&file), self.defaults_dir.join(&file)],
                )
            }
        }
    }

    fn read_cached(&self, path: &Path) -> Option<String> {
        let mut cache = self.cache.lock().expect("prompt cache lock poisoned");
        if let Some(hit) = cache.get(path) {
            return Some(hit.clone());
        }
        let text = std::fs::read_to_string(path).ok()?;
        cache.insert(path.to_path_buf(), text.clone());
        Some(text)
    }
}

/// Append `.md` only when the path has no extension at all.
fn with_md_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_none() {
        path.with_extension("md")
    } else {
        path
    }
}

/// The packaged default templates live next to the installed binary.
fn installed_defaults_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join("prompts")))
        .unwrap_or_else(|| PathBuf::from("prompts"))
}

/// Replace every literal `${issueNumber}` with the decimal issue number.
/// No other character of the template is altered.
pub fn substitute_issue_number(template: &str, issue: u64) -> String {
    template.replace(ISSUE_NUMBER_TOKEN, &issue.to_string())
}
