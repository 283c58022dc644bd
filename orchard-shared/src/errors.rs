//! Error taxonomy for orchard.

use std::time::Duration;

use thiserror::Error;

/// Result type used across the orchard crates.
pub type OrchardResult<T> = Result<T, OrchardError>;

/// Errors surfaced by the runtime-state protocol, the shim and the lifecycle layer.
#[derive(Debug, Error)]
pub enum OrchardError {
    /// Another process already owns this VM's lifecycle.
    #[error("vm {0} is already starting or running (lock held)")]
    LockHeld(String),

    /// Unknown VM, or a runtime marker is absent or unreadable.
    #[error("not found: {0}")]
    NotFound(String),

    /// The shim did not publish its ready marker in time. The VM may still come up.
    #[error("timed out after {timeout:?} waiting for readiness of {name}")]
    ReadinessTimeout { name: String, timeout: Duration },

    /// The virtualization backend refused to start the VM.
    #[error("backend failed to start vm: {0}")]
    BackendStart(String),

    /// Runtime markers name a process that no longer exists.
    #[error("stale runtime state: {0}")]
    StaleState(String),

    /// Signal target does not exist. Callers that stop processes treat this as success.
    #[error("process {0} no longer exists")]
    ProcessAlreadyGone(u32),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OrchardError {
    /// True for errors that mean "the VM is not running" rather than a real failure.
    pub fn is_not_running(&self) -> bool {
        matches!(
            self,
            OrchardError::NotFound(_) | OrchardError::StaleState(_)
        )
    }
}
