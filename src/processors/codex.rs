//! Codex CLI backend.

use super::ProcessorBackend;
use crate::models::ProcessorName;

/// Runs `codex exec` in full-auto mode. The prompt is the last positional
/// argument.
pub struct CodexBackend;

impl ProcessorBackend for CodexBackend {
    fn name(&self) -> ProcessorName {
        ProcessorName::Codex
    }

    fn build_args(&self, prompt: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            "--full-auto".to_string(),
            "--dangerously-bypass-approvals-and-sandbox".to_string(),
            prompt.to_string(),
        ]
    }
}
