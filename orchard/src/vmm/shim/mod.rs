//! Logic executed inside the detached per-VM shim process.
//!
//! One shim owns one VM session. It publishes its pid, starts the backend, commits the
//! ready marker and then parks until its shutdown token fires, at which point it stops the
//! backend and removes every runtime marker it created.

mod signal;

pub use signal::shutdown_on_signal;

use std::sync::Arc;

use orchard_shared::{OrchardError, OrchardResult};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::runstate::RunState;
use crate::runtime::{FilesystemLayout, OrchardOptions, VmRecord};
use crate::store::{SqliteVmStore, VmStore};
use crate::vmm::provider::{HandleRegistry, ProviderOptions, VfkitProvider, VirtualizationProvider};

/// Drives one VM through start, ready, wait and teardown.
pub struct ShimRuntime {
    store: Arc<dyn VmStore>,
    runstate: RunState,
    provider: Arc<dyn VirtualizationProvider>,
}

impl ShimRuntime {
    pub fn new(
        store: Arc<dyn VmStore>,
        runstate: RunState,
        provider: Arc<dyn VirtualizationProvider>,
    ) -> Self {
        Self {
            store,
            runstate,
            provider,
        }
    }

    /// Runtime wired to the host: SQLite store, real process probes and vfkit.
    pub fn open(options: &OrchardOptions, provider_options: ProviderOptions) -> OrchardResult<Self> {
        options.validate()?;
        let layout = FilesystemLayout::new(options.home_dir.clone());
        layout.prepare()?;

        let store = SqliteVmStore::open(layout.clone())?;
        let runstate = RunState::new(layout.clone()).with_poll_interval(options.poll_interval);
        let handles: Arc<HandleRegistry<Child>> = Arc::new(HandleRegistry::new());
        let provider = VfkitProvider::new(provider_options, layout, handles);

        Ok(Self::new(Arc::new(store), runstate, Arc::new(provider)))
    }

    /// Run the session for `name` as process `pid` until `shutdown` fires.
    ///
    /// Errors before the ready marker is written mean the VM never became ready. Once
    /// ready, the session always ends with `Ok` after teardown.
    pub async fn run(
        &self,
        name: &str,
        pid: u32,
        shutdown: CancellationToken,
    ) -> OrchardResult<()> {
        let vm = self.store.load(name)?;
        let lock = self.runstate.acquire_lock(name)?;
        tracing::info!(vm = %name, pid = pid, "Shim acquired VM lock");

        // Published before the backend starts so stop can always find us
        self.runstate.write_pid(name, pid)?;

        let backend_pid = match self.start_backend(&vm).await {
            Ok(backend_pid) => backend_pid,
            Err(e) => {
                tracing::error!(vm = %name, error = %e, "Backend failed to start");
                // The pid marker stays behind; the next launch reclaims it as stale
                drop(lock);
                return Err(e);
            }
        };

        if let Err(e) = self.runstate.mark_ready(name) {
            tracing::error!(vm = %name, error = %e, "Failed to publish ready marker");
            self.stop_backend(&vm).await;
            self.clear_markers(name);
            return Err(e);
        }
        tracing::info!(vm = %name, pid = pid, backend_pid = ?backend_pid, "VM ready");

        shutdown.cancelled().await;
        tracing::info!(vm = %name, "Shutdown requested");

        self.stop_backend(&vm).await;
        self.clear_markers(name);
        if let Err(e) = lock.release() {
            tracing::warn!(vm = %name, error = %e, "Failed to release VM lock");
        }

        tracing::info!(vm = %name, "Shim exiting");
        Ok(())
    }

    /// Start the backend and confirm it is still up before the VM may be marked ready.
    async fn start_backend(&self, vm: &VmRecord) -> OrchardResult<Option<u32>> {
        self.launch_backend(vm).await.map_err(|e| match e {
            OrchardError::BackendStart(_) => e,
            other => OrchardError::BackendStart(other.to_string()),
        })
    }

    async fn launch_backend(&self, vm: &VmRecord) -> OrchardResult<Option<u32>> {
        let backend_pid = self.provider.start_vm(vm).await?;
        if !self.provider.is_running(vm).await? {
            self.stop_backend(vm).await;
            return Err(OrchardError::BackendStart(format!(
                "backend for {} exited right after start",
                vm.name
            )));
        }
        Ok(backend_pid)
    }

    async fn stop_backend(&self, vm: &VmRecord) {
        if let Err(e) = self.provider.stop_vm(vm).await {
            tracing::warn!(vm = %vm.name, error = %e, "Failed to stop backend");
        }
    }

    fn clear_markers(&self, name: &str) {
        if let Err(e) = self.runstate.clear(name) {
            tracing::warn!(vm = %name, error = %e, "Failed to clear runtime markers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemVmStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeProvider {
        fail_start: bool,
        exits_after_start: bool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl VirtualizationProvider for FakeProvider {
        async fn start_vm(&self, vm: &VmRecord) -> OrchardResult<Option<u32>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(OrchardError::BackendStart(format!("{} refused", vm.name)));
            }
            Ok(None)
        }

        async fn stop_vm(&self, _vm: &VmRecord) -> OrchardResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_running(&self, _vm: &VmRecord) -> OrchardResult<bool> {
            if self.exits_after_start {
                return Ok(false);
            }
            Ok(self.starts.load(Ordering::SeqCst) > self.stops.load(Ordering::SeqCst))
        }
    }

    fn create_test_shim(provider: Arc<FakeProvider>) -> (TempDir, ShimRuntime, RunState) {
        let dir = tempfile::tempdir().unwrap();
        let layout = FilesystemLayout::new(dir.path().to_path_buf());
        let store = MemVmStore::new(layout.clone());
        store.save(&VmRecord::new("vm-001", Utc::now())).unwrap();

        let runstate = RunState::new(layout).with_poll_interval(Duration::from_millis(10));
        let shim = ShimRuntime::new(Arc::new(store), runstate.clone(), provider);
        (dir, shim, runstate)
    }

    #[tokio::test]
    async fn test_run_publishes_then_tears_down() {
        let provider = Arc::new(FakeProvider::default());
        let (_dir, shim, runstate) = create_test_shim(provider.clone());
        let shim = Arc::new(shim);
        let shutdown = CancellationToken::new();

        let task = {
            let shim = shim.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shim.run("vm-001", 4242, shutdown).await })
        };

        let pid = runstate
            .wait_ready_and_pid("vm-001", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(pid, 4242);
        assert!(runstate.is_locked("vm-001"));

        shutdown.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(provider.stops.load(Ordering::SeqCst), 1);
        assert!(!runstate.is_ready("vm-001"));
        assert!(runstate.read_pid("vm-001").is_err());
        assert!(!runstate.is_locked("vm-001"));
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_no_ready_marker() {
        let provider = Arc::new(FakeProvider {
            fail_start: true,
            ..Default::default()
        });
        let (_dir, shim, runstate) = create_test_shim(provider);

        let err = shim
            .run("vm-001", 4242, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchardError::BackendStart(_)));
        assert!(!runstate.is_ready("vm-001"));
        assert!(!runstate.is_locked("vm-001"));
        // Left for stale cleanup by the next launch
        assert_eq!(runstate.read_pid("vm-001").unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_backend_exiting_after_start_is_not_ready() {
        let provider = Arc::new(FakeProvider {
            exits_after_start: true,
            ..Default::default()
        });
        let (_dir, shim, runstate) = create_test_shim(provider.clone());

        let err = shim
            .run("vm-001", 4242, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchardError::BackendStart(_)));
        assert!(!runstate.is_ready("vm-001"));
        assert!(!runstate.is_locked("vm-001"));
        assert_eq!(provider.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_held_has_no_side_effects() {
        let provider = Arc::new(FakeProvider::default());
        let (_dir, shim, runstate) = create_test_shim(provider.clone());
        let _held = runstate.acquire_lock("vm-001").unwrap();

        let err = shim
            .run("vm-001", 4242, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchardError::LockHeld(_)));
        assert!(runstate.read_pid("vm-001").is_err());
        assert_eq!(provider.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_vm_fails_before_locking() {
        let provider = Arc::new(FakeProvider::default());
        let (_dir, shim, runstate) = create_test_shim(provider);

        let err = shim
            .run("vm-404", 4242, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchardError::NotFound(_)));
        assert!(!runstate.is_locked("vm-404"));
    }
}
