//! Subprocess execution: short-lived collected commands and long-lived
//! supervised children with streaming output.
//!
//! The runner never buffers the streams of a spawned child itself; callers
//! take the raw readers and drain them concurrently so the child cannot
//! deadlock on pipe back-pressure.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::errors::ProcessError;

/// Collected output of a short-lived command.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

fn build_command(argv: &[String], cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd
}

/// Run `argv` to completion, capturing both streams. When `stdin` is
/// provided it is written in full before the pipe closes.
pub async fn run_command(
    argv: &[String],
    cwd: Option<&Path>,
    stdin: Option<&str>,
) -> Result<CommandOutput, ProcessError> {
    assert!(!argv.is_empty(), "run_command requires a program");
    let mut cmd = build_command(argv, cwd);
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: argv[0].clone(),
        source: e,
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                eprintln!("[process] failed to write stdin to {}: {}", argv[0], e);
            }
            drop(pipe);
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ProcessError::Spawn {
            program: argv[0].clone(),
            source: e,
        })?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// A long-lived child with piped streams.
pub struct SpawnedProcess {
    child: Child,
    program: String,
}

impl SpawnedProcess {
    /// Take the raw stdout reader. Framing into lines is the caller's job.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Send a terminating signal without waiting. The child must still be
    /// reaped with `wait`.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            eprintln!("[process] failed to kill {}: {}", self.program, e);
        }
    }

    /// Wait for exit and return the exit code (-1 when signal-killed).
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self
            .child
            .wait()
            .await
            .with_context(|| format!("waiting for {}", self.program))?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Spawn `argv` with piped stdio for streaming supervision. When `stdin`
/// is provided it is written in full and the pipe closed before returning.
pub async fn spawn_process(
    argv: &[String],
    cwd: Option<&Path>,
    stdin: Option<&str>,
) -> Result<SpawnedProcess, ProcessError> {
    assert!(!argv.is_empty(), "spawn_process requires a program");
    let mut cmd = build_command(argv, cwd);
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
        program: argv[0].clone(),
        source: e,
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            let bytes = input.as_bytes().to_vec();
            // Closing the pipe signals EOF to the child.
            if let Err(e) = pipe.write_all(&bytes).await {
                eprintln!("[process] failed to write stdin to {}: {}", argv[0], e);
            }
            drop(pipe);
        }
    }

    Ok(SpawnedProcess {
        child,
        program: argv[0].clone(),
    })
}
