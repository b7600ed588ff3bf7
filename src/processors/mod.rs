//! Processor backends and the shared subprocess supervision driver.
//!
//! A processor is a named external CLI that produces code changes for an
//! issue. Each variant of the closed set supplies argv assembly; the
//! generic [`driver::ProcessorDriver`] owns branching, spawning, output
//! framing, and timeout supervision.

mod claude;
mod codex;
mod driver;

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use driver::{DriverOutcome, ProcessorDriver};

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::models::ProcessorName;
use crate::notify::NotifierSet;
use crate::prompts::PromptLoader;
use crate::state::StateHandle;

/// Argv assembly for one processor variant.
pub trait ProcessorBackend: Send + Sync + 'static {
    fn name(&self) -> ProcessorName;

    /// Arguments after the binary path; the prompt travels as a single
    /// argument.
    fn build_args(&self, prompt: &str) -> Vec<String>;
}

/// What the scheduler sees of a processor: a supervised run over one
/// issue and slot. Real implementation: [`ProcessorDriver`]. Scheduler
/// tests substitute a double.
#[async_trait]
pub trait IssueProcessor: Send + Sync {
    fn name(&self) -> ProcessorName;

    fn display_name(&self) -> &'static str {
        self.name().display_name()
    }

    async fn process(
        &self,
        issue: u64,
        agent_index: u32,
        repo_name: Option<&str>,
    ) -> Result<DriverOutcome>;
}

/// Build drivers for the enabled processor set, keyed and iterated in
/// stable order.
pub fn build_processors(
    enabled: &[ProcessorName],
    config: Arc<Config>,
    state: StateHandle,
    notifiers: Arc<NotifierSet>,
    prompts: Arc<PromptLoader>,
) -> BTreeMap<ProcessorName, Arc<dyn IssueProcessor>> {
    let mut map: BTreeMap<ProcessorName, Arc<dyn IssueProcessor>> = BTreeMap::new();
    for name in enabled {
        let processor: Arc<dyn IssueProcessor> = match name {
            ProcessorName::Claude => Arc::new(ProcessorDriver::new(
                ClaudeBackend,
                config.clone(),
                state.clone(),
                notifiers.clone(),
                prompts.clone(),
            )),
            ProcessorName::Codex => Arc::new(ProcessorDriver::new(
                CodexBackend,
                config.clone(),
                state.clone(),
                notifiers.clone(),
                prompts.clone(),
            )),
        };
        map.insert(*name, processor);
    }
    map
}

/// Best-effort extraction of a session identifier from one stdout line.
/// Accepts both `session_id` and `sessionId` spellings; anything that is
/// not a JSON object is ignored.
pub fn extract_session_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value
        .get("session_id")
        .or_else(|| value.get("sessionId"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_session_id_reads_both_spellings() {
        assert_eq!(
            extract_session_id(r#"{"type":"system","session_id":"s-42"}"#),
            Some("s-42".to_string())
        );
        assert_eq!(
            extract_session_id(r#"{"sessionId":"abc"}"#),
            Some("abc".to_string())
        );
    }

    #[test]
    fn extract_session_id_ignores_non_json_and_other_objects() {
        assert_eq!(extract_session_id("plain progress text"), None);
        assert_eq!(extract_session_id(r#"{"type":"assistant"}"#), None);
        assert_eq!(extract_session_id(r#"{"session_id": 7}"#), None);
        assert_eq!(extract_session_id("{truncated"), None);
    }

    #[test]
    fn session_id_prefers_snake_case_field() {
        assert_eq!(
            extract_session_id(r#"{"session_id":"snake","sessionId":"camel"}"#),
            Some("snake".to_string())
        );
    }
}
