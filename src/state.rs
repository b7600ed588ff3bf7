//! Durable processing state: a map from `(issue, processor)` to
//! `IssueState`, serialized as a single JSON object whose keys are
//! `"<issue>:<processor>"`. Legacy bare-integer keys from the single-
//! processor era are read as processor `claude`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::models::{IssueState, ProcessStatus, ProcessorName};

/// Composite primary key of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    pub issue: u64,
    pub processor: ProcessorName,
}

impl StateKey {
    pub fn new(issue: u64, processor: ProcessorName) -> Self {
        Self { issue, processor }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.issue, self.processor)
    }

    /// Parse `"<issue>:<processor>"`, accepting a bare issue number as the
    /// legacy claude form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.split_once(':') {
            Some((issue, processor)) => Some(Self {
                issue: issue.parse().ok()?,
                processor: processor.parse().ok()?,
            }),
            None => Some(Self {
                issue: raw.parse().ok()?,
                processor: ProcessorName::Claude,
            }),
        }
    }
}

/// On-disk value shape: the key fields are omitted, as are null options.
#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    status: ProcessStatus,
    branch: String,
    start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<DateTime<Utc>>,
    agent_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StateRecord {
    fn from_state(state: &IssueState) -> Self {
        Self {
            status: state.status,
            branch: state.branch.clone(),
            start_time: state.start_time,
            end_time: state.end_time,
            agent_index: state.agent_index,
            repo_name: state.repo_name.clone(),
            session_id: state.session_id.clone(),
            last_output: state.last_output.clone(),
            error: state.error.clone(),
        }
    }

    fn into_state(self, key: StateKey) -> IssueState {
        IssueState {
            issue_number: key.issue,
            processor: key.processor,
            status: self.status,
            branch: self.branch,
            start_time: self.start_time,
            end_time: self.end_time,
            agent_index: self.agent_index,
            repo_name: self.repo_name,
            session_id: self.session_id,
            last_output: self.last_output,
            error: self.error,
        }
    }
}

/// In-memory store over `~/.imploid/processing-state.json`.
///
/// Single-writer within a process; wrap it in a [`StateHandle`] to share
/// across pipelines.
pub struct StateStore {
    path: PathBuf,
    states: BTreeMap<StateKey, IssueState>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            states: BTreeMap::new(),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Config::imploid_dir()?.join("processing-state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state file if present. Corrupt entries are skipped with a
    /// warning; a missing or unreadable file yields an empty store.
    pub fn initialize(&mut self) -> Result<()> {
        self.states.clear();
        if !self.path.exists() {
            return Ok(());
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("[state] failed to read {}: {}", self.path.display(), e);
                return Ok(());
            }
        };
        let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("[state] state file is not valid JSON, starting empty: {}", e);
                return Ok(());
            }
        };
        for (raw_key, value) in raw {
            let Some(key) = StateKey::parse(&raw_key) else {
                eprintln!("[state] skipping unrecognized state key '{}'", raw_key);
                continue;
            };
            match serde_json::from_value::<StateRecord>(value) {
                Ok(record) => {
                    self.states.insert(key, record.into_state(key));
                }
                Err(e) => {
                    eprintln!("[state] skipping corrupt entry '{}': {}", raw_key, e);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, issue: u64, processor: ProcessorName) -> Option<&IssueState> {
        self.states.get(&StateKey::new(issue, processor))
    }

    pub fn get_mut(&mut self, issue: u64, processor: ProcessorName) -> Option<&mut IssueState> {
        self.states.get_mut(&StateKey::new(issue, processor))
    }

    pub fn set(&mut self, state: IssueState) {
        let key = StateKey::new(state.issue_number, state.processor);
        self.states.insert(key, state);
    }

    pub fn remove(&mut self, issue: u64, processor: ProcessorName) -> Option<IssueState> {
        self.states.remove(&StateKey::new(issue, processor))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IssueState> {
        self.states.values()
    }

    /// Write the full map atomically: temp file in the same directory, then
    /// rename into place.
    pub fn save_all(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut map = serde_json::Map::new();
        for (key, state) in &self.states {
            map.insert(
                key.encode(),
                serde_json::to_value(StateRecord::from_state(state))?,
            );
        }
        let body = serde_json::to_string_pretty(&serde_json::Value::Object(map))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn active_states(&self) -> Vec<&IssueState> {
        self.states
            .values()
            .filter(|s| s.status.is_active())
            .collect()
    }

    pub fn active_states_by_processor(&self, processor: ProcessorName) -> Vec<&IssueState> {
        self.states
            .values()
            .filter(|s| s.processor == processor && s.status.is_active())
            .collect()
    }

    /// Active issue numbers across all processors; an issue counts once.
    pub fn active_issue_numbers(&self) -> BTreeSet<u64> {
        self.states
            .values()
            .filter(|s| s.status.is_active())
            .map(|s| s.issue_number)
            .collect()
    }

    pub fn active_issue_numbers_by_processor(&self, processor: ProcessorName) -> BTreeSet<u64> {
        self.active_states_by_processor(processor)
            .iter()
            .map(|s| s.issue_number)
            .collect()
    }

    /// Smallest slot index in `[0, max_concurrent)` not occupied by an
    /// active state of `processor`.
    pub fn available_agent_index(
        &self,
        processor: ProcessorName,
        max_concurrent: u32,
    ) -> Option<u32> {
        let used: BTreeSet<u32> = self
            .active_states_by_processor(processor)
            .iter()
            .map(|s| s.agent_index)
            .collect();
        (0..max_concurrent).find(|i| !used.contains(i))
    }
}

/// Shared handle serializing all store access behind one async mutex, in
/// the manner of a database handle: callers pass a closure over the store.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<StateStore>>,
}

impl StateHandle {
    pub fn new(store: StateStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn with<R>(&self, f: impl FnOnce(&mut StateStore) -> R) -> R {
        let mut store = self.inner.lock().await;
        f(&mut store)
    }

    /// Persist the current map. The single durability point: every
    /// externally observable transition is followed by one of these.
    pub async fn save(&self) -> Result<()> {
        self.inner.lock().await.save_all()
    }
}
