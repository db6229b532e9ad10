//! Worker reload signalling
//!
//! After a swap the lifecycle manager asks the serving workers to restart
//! their scorers. In-process this is a watch channel carrying a generation
//! counter; across processes it is SIGHUP sent to the pid in a pidfile.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::ReloadError;

/// Something that can ask the workers to reload
pub trait ReloadSignal: Send + Sync {
    fn signal(&self) -> Result<(), ReloadError>;
}

/// Reload signal delivered over a tokio watch channel
pub struct ChannelReload {
    tx: watch::Sender<u64>,
}

impl ChannelReload {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Receiver that changes on every signal
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Number of signals sent so far
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for ChannelReload {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadSignal for ChannelReload {
    fn signal(&self) -> Result<(), ReloadError> {
        self.tx.send_modify(|generation| *generation += 1);
        debug!(generation = self.generation(), "Reload signalled");
        if self.tx.receiver_count() == 0 {
            return Err(ReloadError::Closed);
        }
        Ok(())
    }
}

/// Reload signal delivered as SIGHUP to the process named in a pidfile
pub struct PidFileReload {
    path: PathBuf,
}

impl PidFileReload {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_pid(&self) -> Result<i32, ReloadError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ReloadError::PidFile {
            path: self.path.display().to_string(),
            source,
        })?;
        content
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| ReloadError::InvalidPid(content.trim().to_string()))
    }
}

impl ReloadSignal for PidFileReload {
    #[cfg(unix)]
    fn signal(&self) -> Result<(), ReloadError> {
        let pid = self.read_pid()?;
        // SAFETY: kill() has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGHUP) };
        if rc != 0 {
            return Err(ReloadError::SignalFailed {
                pid,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        info!(pid = pid, "Sent SIGHUP to server process");
        Ok(())
    }

    #[cfg(not(unix))]
    fn signal(&self) -> Result<(), ReloadError> {
        let pid = self.read_pid()?;
        Err(ReloadError::SignalFailed {
            pid,
            reason: "signals are not supported on this platform".to_string(),
        })
    }
}

/// Record the current process id in `path`
pub fn write_pidfile(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, std::process::id().to_string())
}

/// Remove a pidfile, ignoring a missing file
pub fn remove_pidfile(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
