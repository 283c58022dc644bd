//! Launcher backed by the runtime-state markers.

use std::sync::Arc;
use std::time::Duration;

use orchard_shared::{OrchardError, OrchardResult};
use tokio_util::sync::CancellationToken;

use super::{ShimLauncher, ShimSpawner};
use crate::runstate::RunState;
use crate::runtime::VmRecord;

/// Spawns shims through a [`ShimSpawner`] and tracks them through [`RunState`].
pub struct ShimController {
    runstate: RunState,
    spawner: Arc<dyn ShimSpawner>,
    ready_timeout: Duration,
}

impl ShimController {
    pub fn new(runstate: RunState, spawner: Arc<dyn ShimSpawner>, ready_timeout: Duration) -> Self {
        Self {
            runstate,
            spawner,
            ready_timeout,
        }
    }

    pub fn runstate(&self) -> &RunState {
        &self.runstate
    }
}

#[async_trait::async_trait]
impl ShimLauncher for ShimController {
    async fn start_detached(&self, vm: &VmRecord) -> OrchardResult<u32> {
        if self.runstate.cleanup_if_stale(&vm.name)? {
            tracing::info!(vm = %vm.name, "Removed stale runtime state before launch");
        }

        let pid = self.spawner.spawn(&vm.name)?;
        tracing::info!(vm = %vm.name, pid = pid, "Launched shim");
        Ok(pid)
    }

    async fn wait_ready_and_pid(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> OrchardResult<u32> {
        self.runstate
            .wait_ready_and_pid(name, self.ready_timeout, cancel)
            .await
    }

    fn get_pid(&self, name: &str) -> OrchardResult<u32> {
        let pid = self.runstate.read_pid(name)?;
        if !self.runstate.processes().is_alive(pid) {
            return Err(OrchardError::StaleState(format!(
                "pid marker for {} names dead pid {}",
                name, pid
            )));
        }
        Ok(pid)
    }

    fn stop(&self, pid: u32) -> OrchardResult<()> {
        match self.runstate.processes().terminate(pid) {
            Ok(()) => {
                tracing::info!(pid = pid, "Sent SIGTERM to shim");
                Ok(())
            }
            Err(OrchardError::ProcessAlreadyGone(_)) => {
                tracing::debug!(pid = pid, "Shim already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
