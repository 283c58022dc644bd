//! Process liveness probing and signalling.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use orchard_shared::{OrchardError, OrchardResult};

/// OS process operations used by the runtime-state protocol.
///
/// The host implementation talks to the kernel; tests substitute a fake process table so
/// that in-process shims can be "alive" and "terminated" without real signals.
pub trait ProcessControl: Send + Sync {
    /// Signal-0 probe.
    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the process to shut down gracefully (SIGTERM).
    ///
    /// Returns `ProcessAlreadyGone` when the target does not exist.
    fn terminate(&self, pid: u32) -> OrchardResult<()>;
}

/// Processes on this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProcesses;

impl ProcessControl for HostProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }

    fn terminate(&self, pid: u32) -> OrchardResult<()> {
        terminate_process(pid)
    }
}

/// Convert a pid to a signal target, rejecting values `kill(2)` would treat as
/// process groups (0, negatives after the cast).
fn to_target(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

/// Check if a process with the given PID exists.
///
/// Uses `kill(pid, 0)`. `EPERM` means the process exists but belongs to someone else,
/// which still counts as alive.
///
/// # Returns
/// * `true` - Process exists
/// * `false` - Process does not exist or the pid is not a valid target
pub fn is_process_alive(pid: u32) -> bool {
    let Some(target) = to_target(pid) else {
        return false;
    };
    match signal::kill(target, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Send SIGTERM to `pid`.
pub fn terminate_process(pid: u32) -> OrchardResult<()> {
    let target = to_target(pid).ok_or(OrchardError::ProcessAlreadyGone(pid))?;
    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(OrchardError::ProcessAlreadyGone(pid)),
        Err(e) => Err(OrchardError::Internal(format!(
            "failed to send SIGTERM to {}: {}",
            pid, e
        ))),
    }
}
