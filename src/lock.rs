//! Single-instance guard
//!
//! A PID file marks a running deploy. A lock left behind by a dead process
//! is replaced; a live one makes the new invocation give up before touching
//! the host. The guard removes the file when dropped.

use crate::error::{DeployError, IoResultExt, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

/// Held PID lock
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    /// Take the lock at `path` for the current process
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(pid) = read_pid(path) {
            if is_process_alive(pid) {
                return Err(DeployError::AlreadyRunning(pid));
            }
            tracing::info!("Removing stale lock file {} (pid {})", path.display(), pid);
        }
        if path.exists() {
            std::fs::remove_file(path).with_path(path)?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
        std::fs::write(path, std::process::id().to_string()).with_path(path)?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Unable to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// PID stored in a lock file; unreadable content counts as no PID
fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Zero-signal liveness probe
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // exists, owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Above the kernel's pid_max ceiling (2^22), so never a live process.
    const DEAD_PID: i32 = 999_999_999;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run/exa_client_deploy.lock");

        let lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exa_client_deploy.lock");
        std::fs::write(&path, DEAD_PID.to_string()).unwrap();

        let _lock = PidLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
    }

    #[test]
    fn test_live_lock_refused_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exa_client_deploy.lock");
        // this test process is alive
        let me = std::process::id().to_string();
        std::fs::write(&path, &me).unwrap();

        let err = PidLock::acquire(&path).unwrap_err();
        assert!(matches!(err, DeployError::AlreadyRunning(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), me);
    }

    #[test]
    fn test_garbage_lock_is_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exa_client_deploy.lock");
        std::fs::write(&path, "not a pid").unwrap();

        assert!(PidLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_liveness_probe() {
        assert!(is_process_alive(std::process::id() as i32));
        assert!(!is_process_alive(DEAD_PID));
        assert!(!is_process_alive(0));
    }
}
