//! Runtime-state coordination between the controller and per-VM shims.
//!
//! The filesystem is the only channel between processes. Each VM directory holds three
//! independent artifacts:
//!
//! - `vm.lock.d/`: lock, held while the directory exists (`mkdir` is all-or-nothing)
//! - `vm.pid`: pid of the shim, published before the backend starts
//! - `vm.ready`: commit marker, written only after the backend started
//!
//! The pid marker is always written before the ready marker, so a reader that sees
//! `vm.ready` can always read a pid. Markers have a single writer (the owning shim) and any
//! number of readers; both are replaced atomically via rename.

mod lock;

pub use lock::LockGuard;

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use orchard_shared::{OrchardError, OrchardResult};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::runtime::constants::DEFAULT_POLL_INTERVAL;
use crate::runtime::{FilesystemLayout, RuntimePaths};
use crate::util::fs::{remove_file_if_exists, write_atomic};
use crate::util::{HostProcesses, ProcessControl};

/// Filesystem coordinator for VM runtime state, keyed by VM name.
#[derive(Clone)]
pub struct RunState {
    layout: FilesystemLayout,
    processes: Arc<dyn ProcessControl>,
    poll_interval: Duration,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("home_dir", &self.layout.home_dir())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl RunState {
    /// Coordinator probing real host processes.
    pub fn new(layout: FilesystemLayout) -> Self {
        Self::with_processes(layout, Arc::new(HostProcesses))
    }

    pub fn with_processes(layout: FilesystemLayout, processes: Arc<dyn ProcessControl>) -> Self {
        Self {
            layout,
            processes,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn paths(&self, name: &str) -> RuntimePaths {
        self.layout.runtime_paths(name)
    }

    pub fn processes(&self) -> &Arc<dyn ProcessControl> {
        &self.processes
    }

    /// Take the VM's lock.
    ///
    /// Fails with `LockHeld` if any process already holds it. The returned guard removes
    /// the lock directory when dropped.
    pub fn acquire_lock(&self, name: &str) -> OrchardResult<LockGuard> {
        LockGuard::acquire(name, &self.paths(name))
    }

    /// True while some process holds the VM's lock.
    pub fn is_locked(&self, name: &str) -> bool {
        self.paths(name).lock_dir.is_dir()
    }

    /// Durably publish the shim pid.
    pub fn write_pid(&self, name: &str, pid: u32) -> OrchardResult<()> {
        let paths = self.paths(name);
        write_atomic(&paths.pid_file, format!("{}\n", pid).as_bytes())?;
        tracing::debug!(vm = %name, pid = pid, "Published pid marker");
        Ok(())
    }

    /// Read the published pid.
    ///
    /// Absent, empty, unparsable and zero markers all yield `NotFound`.
    pub fn read_pid(&self, name: &str) -> OrchardResult<u32> {
        let paths = self.paths(name);
        let contents = match std::fs::read_to_string(&paths.pid_file) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchardError::NotFound(format!("no pid marker for {}", name)));
            }
            Err(e) => return Err(e.into()),
        };
        parse_pid(&contents).ok_or_else(|| {
            OrchardError::NotFound(format!(
                "malformed pid marker for {}: {:?}",
                name,
                contents.trim()
            ))
        })
    }

    /// Commit point: the backend is up.
    ///
    /// Refuses to run before a pid marker exists, so ready always implies pid.
    pub fn mark_ready(&self, name: &str) -> OrchardResult<()> {
        let paths = self.paths(name);
        if !paths.pid_file.is_file() {
            return Err(OrchardError::InvalidState(format!(
                "cannot mark {} ready before its pid is published",
                name
            )));
        }
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        write_atomic(&paths.ready_file, stamp.as_bytes())?;
        tracing::debug!(vm = %name, "Published ready marker");
        Ok(())
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.paths(name).ready_file.is_file()
    }

    /// Remove the pid and ready markers. Missing files are ignored; the lock is untouched.
    pub fn clear(&self, name: &str) -> OrchardResult<()> {
        let paths = self.paths(name);
        // Ready first so no reader can pair it with a missing pid
        remove_file_if_exists(&paths.ready_file)?;
        remove_file_if_exists(&paths.pid_file)?;
        Ok(())
    }

    /// Reclaim runtime state left behind by a shim that died without clearing it.
    ///
    /// Returns `true` if stale state was removed. A missing or malformed pid marker, or a
    /// marker naming a live process, leaves everything untouched.
    pub fn cleanup_if_stale(&self, name: &str) -> OrchardResult<bool> {
        let pid = match self.read_pid(name) {
            Ok(pid) => pid,
            Err(OrchardError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if self.processes.is_alive(pid) {
            return Ok(false);
        }

        let stale = OrchardError::StaleState(format!("{} names dead pid {}", name, pid));
        tracing::warn!(vm = %name, pid = pid, reason = %stale, "Reclaiming runtime state");

        let paths = self.paths(name);
        remove_file_if_exists(&paths.ready_file)?;
        remove_file_if_exists(&paths.pid_file)?;
        match std::fs::remove_dir_all(&paths.lock_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        Ok(true)
    }

    /// Poll for the ready marker and return the published pid.
    ///
    /// The deadline is absolute from call start. Cancellation is observed immediately
    /// rather than at the next poll.
    pub async fn wait_ready_and_pid(
        &self,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OrchardResult<u32> {
        let deadline = Instant::now() + timeout;
        tracing::debug!(vm = %name, timeout = ?timeout, "Waiting for ready marker");

        loop {
            if self.is_ready(name) {
                let pid = self.read_pid(name)?;
                tracing::debug!(vm = %name, pid = pid, "Ready marker observed");
                return Ok(pid);
            }
            if Instant::now() >= deadline {
                return Err(OrchardError::ReadinessTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(OrchardError::Cancelled(format!(
                        "waiting for readiness of {}",
                        name
                    )));
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

fn parse_pid(contents: &str) -> Option<u32> {
    contents
        .split_whitespace()
        .next()?
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid > 0)
}
