//! Claude Code CLI backend.

use super::ProcessorBackend;
use crate::models::ProcessorName;

/// Runs `claude` in print mode with stream-json output so the driver can
/// capture the session id from the first structured line.
pub struct ClaudeBackend;

impl ProcessorBackend for ClaudeBackend {
    fn name(&self) -> ProcessorName {
        ProcessorName::Claude
    }

    fn build_args(&self, prompt: &str) -> Vec<String> {
        vec![
            "--dangerously-skip-permissions".to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]
    }
}
