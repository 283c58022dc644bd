//! Controller-side management of detached shims.
//!
//! The controller never talks to a shim directly. It spawns one, then learns about it only
//! through the runtime markers:
//!
//! - **ShimSpawner**: how a shim process comes into existence (re-exec, or in-process for tests)
//! - **ShimLauncher**: start/wait/query/stop operations used by the lifecycle layer
//!
//! A shim outlives the controller invocation that spawned it.

mod shim;
mod spawn;

pub use shim::ShimController;
pub use spawn::{ExecSpawner, ShimSpawner};

use orchard_shared::OrchardResult;
use tokio_util::sync::CancellationToken;

use crate::runtime::VmRecord;

/// Starts, finds and stops per-VM shims.
#[async_trait::async_trait]
pub trait ShimLauncher: Send + Sync {
    /// Reclaim stale runtime state, then spawn a detached shim for `vm`.
    ///
    /// # Returns
    /// The spawned process id, as soon as the process exists. Readiness is not implied.
    async fn start_detached(&self, vm: &VmRecord) -> OrchardResult<u32>;

    /// Wait (bounded) for the ready marker and return the pid it is paired with.
    async fn wait_ready_and_pid(&self, name: &str, cancel: &CancellationToken)
    -> OrchardResult<u32>;

    /// Pid of the live shim owning `name`.
    ///
    /// `NotFound` without a pid marker, `StaleState` when the marker names a dead process.
    fn get_pid(&self, name: &str) -> OrchardResult<u32>;

    /// Ask the shim to shut down. A process that is already gone counts as stopped.
    fn stop(&self, pid: u32) -> OrchardResult<()>;
}
