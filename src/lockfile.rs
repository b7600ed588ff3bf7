//! Advisory cross-process single-writer lock.
//!
//! The lock is a JSON file `{pid, startTime}` under `~/.imploid`. Liveness
//! of the recorded pid is probed with signal 0, which tests existence
//! without delivering a signal; a dead holder's file is treated as stale
//! and removed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::sys::signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
}

pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> anyhow::Result<PathBuf> {
        Ok(Config::imploid_dir()?.join("imploid.lock"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock. Returns false when a live holder exists or the
    /// filesystem refuses; a stale file (dead pid or unreadable content) is
    /// deleted and the acquisition retried once.
    pub fn acquire(&self) -> bool {
        for attempt in 0..2 {
            if self.try_create() {
                return true;
            }
            match self.holder() {
                Some(info) if process_exists(info.pid) => return false,
                _ => {
                    if attempt == 0 {
                        eprintln!(
                            "[lock] removing stale lock file at {}",
                            self.path.display()
                        );
                        if std::fs::remove_file(&self.path).is_err() && !self.path.exists() {
                            // Someone else removed it first; retry the create.
                            continue;
                        }
                    }
                }
            }
        }
        false
    }

    fn try_create(&self) -> bool {
        if let Some(parent) = self.path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return false;
            }
        }
        let info = LockInfo {
            pid: std::process::id(),
            start_time: Utc::now(),
        };
        let body = match serde_json::to_string_pretty(&info) {
            Ok(body) => body,
            Err(_) => return false,
        };
        // create_new is the atomicity guarantee: exactly one process wins.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(body.as_bytes()).is_ok() && file.sync_all().is_ok()
            }
            Err(_) => false,
        }
    }

    /// Delete the lock iff this process owns it. A missing file is benign.
    pub fn release(&self) {
        match self.holder() {
            Some(info) if info.pid == std::process::id() => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    eprintln!("[lock] failed to remove lock file: {}", e);
                }
            }
            Some(_) | None => {}
        }
    }

    /// The current holder as recorded on disk, if readable.
    pub fn holder(&self) -> Option<LockInfo> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }
}

fn process_exists(pid: u32) -> bool {
    // Signal 0 probes existence without sending anything. EPERM means the
    // process exists but belongs to another user.
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}
