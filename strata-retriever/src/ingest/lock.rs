//! Single-owner processor lock.
//!
//! Only one drain loop may process the queue at a time, across processes.
//! The lock is a JSON token file created with `create_new` so acquisition
//! is atomic on every platform. A token left behind by a dead owner is
//! detected by PID liveness where the platform supports it, with a
//! wall-clock staleness window as the fallback when liveness is unknowable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Answers "is the process that wrote this token still running?".
///
/// `None` means the platform cannot tell; the staleness window alone then
/// decides whether the token is stale.
pub trait OwnerLiveness: Send + Sync {
    fn is_alive(&self, pid: u32) -> Option<bool>;
}

/// Liveness via `/proc/{pid}` on Linux; unknown elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct PidLiveness;

impl OwnerLiveness for PidLiveness {
    #[cfg(target_os = "linux")]
    fn is_alive(&self, pid: u32) -> Option<bool> {
        Some(std::path::Path::new(&format!("/proc/{pid}")).exists())
    }

    #[cfg(not(target_os = "linux"))]
    fn is_alive(&self, _pid: u32) -> Option<bool> {
        None
    }
}

/// The token written into the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockToken {
    pub pid: u32,
    /// Unix timestamp of acquisition
    pub acquired_at: i64,
}

impl LockToken {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: chrono::Utc::now().timestamp(),
        }
    }

    fn age(&self) -> Duration {
        let secs = (chrono::Utc::now().timestamp() - self.acquired_at).max(0);
        Duration::from_secs(secs as u64)
    }
}

/// File-based lock guarding the drain loop.
pub struct ProcessorLock {
    path: PathBuf,
    liveness: Arc<dyn OwnerLiveness>,
    staleness: Duration,
}

impl ProcessorLock {
    pub fn new(path: PathBuf, liveness: Arc<dyn OwnerLiveness>, staleness: Duration) -> Self {
        Self {
            path,
            liveness,
            staleness,
        }
    }

    /// Try to take the lock. Returns `false` without blocking when another
    /// live owner holds it; the caller is expected to no-op, not wait.
    pub fn acquire(&self) -> Result<bool> {
        if self.try_create()? {
            return Ok(true);
        }

        // Contended: usurp only a stale token.
        match self.read_token() {
            Ok(Some(token)) if self.is_stale(&token) => {
                warn!(
                    pid = token.pid,
                    age_secs = token.age().as_secs(),
                    "removing stale processor lock"
                );
                self.remove_file()?;
                self.try_create()
            }
            Ok(Some(token)) => {
                debug!(pid = token.pid, "processor lock held by live owner");
                Ok(false)
            }
            // Unreadable or vanished token: clear it and try once more,
            // losing the race is fine.
            Ok(None) | Err(_) => {
                self.remove_file()?;
                self.try_create()
            }
        }
    }

    /// Drop the lock if this process owns it.
    pub fn release(&self) -> Result<()> {
        match self.read_token()? {
            Some(token) if token.pid == std::process::id() => self.remove_file(),
            Some(token) => {
                warn!(pid = token.pid, "not releasing lock owned by another process");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn is_stale(&self, token: &LockToken) -> bool {
        match self.liveness.is_alive(token.pid) {
            Some(false) => true,
            Some(true) => false,
            None => token.age() > self.staleness,
        }
    }

    fn try_create(&self) -> Result<bool> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                let token = LockToken::current();
                let body = serde_json::to_string(&token)?;
                file.write_all(body.as_bytes())
                    .with_context(|| format!("writing lock token to {}", self.path.display()))?;
                debug!(pid = token.pid, path = %self.path.display(), "acquired processor lock");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("creating lock file {}", self.path.display()))
            }
        }
    }

    fn read_token(&self) -> Result<Option<LockToken>> {
        let body = match std::fs::read_to_string(&self.path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading lock file {}", self.path.display()));
            }
        };
        // A corrupt token is treated as absent; acquire() races to recreate.
        Ok(serde_json::from_str(&body).ok())
    }

    fn remove_file(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing lock file {}", self.path.display()))
            }
        }
    }
}
