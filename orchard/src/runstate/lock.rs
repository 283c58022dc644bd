//! Per-VM lock directory.

use std::path::PathBuf;

use orchard_shared::{OrchardError, OrchardResult};

use crate::runtime::RuntimePaths;

/// Ownership of one VM's lifecycle.
///
/// Held while the lock directory exists. Dropping the guard removes the directory, so
/// every exit path of the owner releases the lock. Only meaningful on a single host.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub(super) fn acquire(name: &str, paths: &RuntimePaths) -> OrchardResult<Self> {
        std::fs::create_dir_all(&paths.dir)?;

        match std::fs::create_dir(&paths.lock_dir) {
            Ok(()) => {
                tracing::debug!(vm = %name, lock = %paths.lock_dir.display(), "Acquired lock");
                Ok(Self {
                    name: name.to_string(),
                    path: paths.lock_dir.clone(),
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(OrchardError::LockHeld(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release now and report failures, instead of the best-effort release on drop.
    pub fn release(mut self) -> OrchardResult<()> {
        self.released = true;
        remove_lock_dir(&self.path)?;
        tracing::debug!(vm = %self.name, "Released lock");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_lock_dir(&self.path) {
            tracing::warn!(
                vm = %self.name,
                path = %self.path.display(),
                error = %e,
                "Failed to release lock on drop"
            );
        } else {
            tracing::debug!(vm = %self.name, "Released lock on drop");
        }
    }
}

fn remove_lock_dir(path: &std::path::Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
