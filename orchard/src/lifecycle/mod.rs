//! VM lifecycle: reconciling persisted records with live shims.
//!
//! The persisted `status` is only a cache. Every decision re-derives liveness from the
//! runtime markers and the OS through the [`ShimLauncher`].

mod provision;

pub use provision::UpParams;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchard_shared::{OrchardError, OrchardResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::artifacts::{FsArtifacts, VmArtifacts};
use crate::cloudinit::CloudInitSeed;
use crate::runstate::RunState;
use crate::runtime::{Clock, FilesystemLayout, OrchardOptions, SystemClock, VmRecord, VmStatus};
use crate::store::{SqliteVmStore, VmStore};
use crate::vmm::{ExecSpawner, ShimController, ShimLauncher};

/// Live status of one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatusReport {
    pub name: String,
    pub running: bool,
    pub pid: Option<u32>,
}

/// One row of [`Orchard::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmSummary {
    pub name: String,
    pub status: VmStatus,
    pub pid: Option<u32>,
    pub cpus: u32,
    pub memory_mib: u64,
    pub disk_size_gib: u64,
    pub created_at: DateTime<Utc>,
}

/// Entry point for every VM operation.
pub struct Orchard {
    store: Arc<dyn VmStore>,
    launcher: Arc<dyn ShimLauncher>,
    artifacts: Arc<dyn VmArtifacts>,
    seed: Arc<CloudInitSeed>,
    clock: Arc<dyn Clock>,
    /// Searched for SSH public keys by `up`.
    ssh_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Orchard {
    pub fn new(
        store: Arc<dyn VmStore>,
        launcher: Arc<dyn ShimLauncher>,
        artifacts: Arc<dyn VmArtifacts>,
        seed: Arc<CloudInitSeed>,
    ) -> Self {
        Self {
            store,
            launcher,
            artifacts,
            seed,
            clock: Arc::new(SystemClock),
            ssh_dir: dirs::home_dir().map(|home| home.join(".ssh")),
            cancel: CancellationToken::new(),
        }
    }

    /// Orchard wired to the host: SQLite store under `home_dir`, shims re-executed from
    /// the current binary, host ISO tooling.
    pub fn open(options: &OrchardOptions) -> OrchardResult<Self> {
        options.validate()?;
        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;

        let store = SqliteVmStore::open(layout.clone())?;
        let runstate = RunState::new(layout.clone()).with_poll_interval(options.poll_interval);
        let spawner = ExecSpawner::current(options.home_dir.clone())?;
        let launcher = ShimController::new(runstate, Arc::new(spawner), options.ready_timeout);

        tracing::debug!(home = %options.home_dir.display(), "Opened orchard home");
        Ok(Self::new(
            Arc::new(store),
            Arc::new(launcher),
            Arc::new(FsArtifacts::new(layout)),
            Arc::new(CloudInitSeed::default()),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ssh_dir(mut self, ssh_dir: Option<PathBuf>) -> Self {
        self.ssh_dir = ssh_dir;
        self
    }

    /// Token that aborts in-flight waits (`start`) with `Cancelled`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Launch the VM's shim and wait until it reports ready.
    ///
    /// `ReadinessTimeout` leaves the record untouched: the VM may still come up.
    pub async fn start(&self, name: &str) -> OrchardResult<VmRecord> {
        let mut vm = self.store.load(name)?;

        match self.launcher.get_pid(name) {
            Ok(pid) => {
                tracing::debug!(vm = %name, pid = pid, "Start refused, shim already running");
                return Err(OrchardError::LockHeld(name.to_string()));
            }
            Err(e) if e.is_not_running() => {}
            Err(e) => return Err(e),
        }

        let spawned = self.launcher.start_detached(&vm).await?;
        let pid = self.launcher.wait_ready_and_pid(name, &self.cancel).await?;
        if pid != spawned {
            // Ready marker belongs to a concurrent start; our shim lost the lock
            tracing::warn!(vm = %name, spawned = spawned, ready = pid, "Another shim owns the VM");
            return Err(OrchardError::LockHeld(name.to_string()));
        }

        vm.mark_running(pid);
        self.store.save(&vm)?;
        tracing::info!(vm = %name, pid = pid, "VM started");
        Ok(vm)
    }

    /// Signal the VM's shim and record the VM as stopped.
    ///
    /// Does not wait for the shim to exit. A VM with no resolvable pid is already stopped.
    pub async fn stop(&self, name: &str) -> OrchardResult<()> {
        let mut vm = self.store.load(name)?;

        let pid = match vm.pid {
            Some(pid) => pid,
            None => match self.launcher.get_pid(name) {
                Ok(pid) => pid,
                Err(e) if e.is_not_running() => {
                    tracing::debug!(vm = %name, reason = %e, "Nothing to stop");
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        self.launcher.stop(pid)?;
        vm.mark_stopped();
        self.store.save(&vm)?;
        tracing::info!(vm = %name, pid = pid, "VM stop requested");
        Ok(())
    }

    /// Remove the VM's record and resources. Running VMs require `force`.
    pub async fn delete(&self, name: &str, force: bool) -> OrchardResult<()> {
        let vm = self.store.load(name)?;

        match self.launcher.get_pid(name) {
            Ok(pid) => {
                if !force {
                    return Err(OrchardError::InvalidState(format!(
                        "vm {} is running; use --force to stop and delete",
                        name
                    )));
                }
                // Signal the live shim, not a possibly stale record pid
                self.launcher.stop(pid)?;
                tracing::debug!(vm = %name, pid = pid, "Stopped before delete");
            }
            Err(e) if e.is_not_running() => {}
            Err(e) => return Err(e),
        }

        self.store.delete(&vm.name)?;

        let vm_dir = self.store.runtime_paths(&vm.name).dir;
        match std::fs::remove_dir_all(&vm_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                vm = %name,
                path = %vm_dir.display(),
                error = %e,
                "Failed to remove VM directory"
            ),
        }

        tracing::info!(vm = %name, "VM deleted");
        Ok(())
    }

    /// Fresh liveness probe; the cached record status is ignored.
    pub async fn status(&self, name: &str) -> OrchardResult<VmStatusReport> {
        let vm = self.store.load(name)?;
        let pid = self.live_pid(&vm.name)?;
        Ok(VmStatusReport {
            name: vm.name,
            running: pid.is_some(),
            pid,
        })
    }

    /// All VMs, oldest first, with live status.
    pub async fn list(&self) -> OrchardResult<Vec<VmSummary>> {
        self.store
            .list()?
            .into_iter()
            .map(|vm| {
                let pid = self.live_pid(&vm.name)?;
                Ok(VmSummary {
                    status: if pid.is_some() {
                        VmStatus::Running
                    } else {
                        VmStatus::Stopped
                    },
                    pid,
                    name: vm.name,
                    cpus: vm.cpus,
                    memory_mib: vm.memory_mib,
                    disk_size_gib: vm.disk_size_gib,
                    created_at: vm.created_at,
                })
            })
            .collect()
    }

    /// Resolve `NAME.local` over mDNS, preferring IPv4.
    pub async fn ip(&self, name: &str) -> OrchardResult<IpAddr> {
        let vm = self.store.load(name)?;
        let host = format!("{}.local", vm.name);

        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host.as_str(), 0))
            .await
            .map_err(|e| OrchardError::NotFound(format!("no IP found for {}: {}", host, e)))?
            .map(|addr| addr.ip())
            .collect();

        pick_address(&addrs)
            .ok_or_else(|| OrchardError::NotFound(format!("no IP found for {}", host)))
    }

    fn live_pid(&self, name: &str) -> OrchardResult<Option<u32>> {
        match self.launcher.get_pid(name) {
            Ok(pid) => Ok(Some(pid)),
            Err(e) if e.is_not_running() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}
