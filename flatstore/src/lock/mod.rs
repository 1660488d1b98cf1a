// Cooperative, file-based write locking.
//
// A writer owns a collection while the sibling `<file>.lock` marker exists.
// The marker is advisory and single-host: a process that dies while
// holding it leaves the marker behind, and it has to be removed by hand.

use crate::cancel::CancellationToken;
use crate::error::{FlatStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Held write lock. The marker file is removed when the guard drops.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Try once to take the lock for `target`. Fails with `Locked` if the
    /// marker already exists.
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = lock_path(target);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(FlatStoreError::Locked {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let lock = FileLock { path };
        // Owner pid helps whoever has to clean up an orphaned marker
        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired lock {}", lock.path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Released lock {}", self.path.display()),
            Err(e) => log::warn!("Failed to remove lock {}: {}", self.path.display(), e),
        }
    }
}

/// Marker path for a collection file: `users.csv` -> `users.csv.lock`.
pub fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Bounded exponential backoff for lock contention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 50,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        RetryPolicy {
            enabled: false,
            ..Default::default()
        }
    }

    /// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << exponent))
    }
}

/// Run `op`, retrying it from the start whenever it fails with lock
/// contention. `op` should cover the whole read-mutate-write sequence so a
/// retry never works from a stale read. Any other error is returned
/// immediately; when retries run out the last `Locked` error is returned.
pub fn with_retry<T, F>(policy: &RetryPolicy, cancel: &CancellationToken, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        cancel.check()?;
        match op() {
            Err(e) if e.is_retryable() && policy.enabled && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                log::debug!(
                    "{e}; retry {attempt}/{} in {}ms",
                    policy.max_retries,
                    delay.as_millis()
                );
                std::thread::sleep(delay);
            }
            result => return result,
        }
    }
}
