//! End-to-end lifecycle against real runtime markers and a real SQLite store.
//!
//! Shims run as tokio tasks instead of processes; a fake process table stands in for
//! `kill(2)` so "alive", "terminated" and "crashed" are all observable.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use orchard::artifacts::FsArtifacts;
use orchard::cloudinit::{CloudInitSeed, IsoBuilder};
use orchard::util::ProcessControl;
use orchard::vmm::{ShimController, ShimRuntime, ShimSpawner, VirtualizationProvider};
use orchard::{
    FilesystemLayout, Orchard, OrchardError, OrchardResult, RunState, SqliteVmStore, VmRecord,
    VmStatus, VmStore,
};

#[derive(Default)]
struct ProcessTable {
    alive: Mutex<HashSet<u32>>,
    shutdown: Mutex<HashMap<u32, CancellationToken>>,
}

impl ProcessTable {
    fn exit(&self, pid: u32) {
        self.alive.lock().remove(&pid);
        self.shutdown.lock().remove(&pid);
    }
}

impl ProcessControl for ProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }

    fn terminate(&self, pid: u32) -> OrchardResult<()> {
        match self.shutdown.lock().get(&pid) {
            Some(token) if self.is_alive(pid) => {
                token.cancel();
                Ok(())
            }
            _ => Err(OrchardError::ProcessAlreadyGone(pid)),
        }
    }
}

#[derive(Default)]
struct FakeProvider {
    fail: AtomicBool,
    running: Mutex<HashSet<String>>,
}

#[async_trait]
impl VirtualizationProvider for FakeProvider {
    async fn start_vm(&self, vm: &VmRecord) -> OrchardResult<Option<u32>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OrchardError::BackendStart("vfkit exited during startup".into()));
        }
        self.running.lock().insert(vm.name.clone());
        Ok(None)
    }

    async fn stop_vm(&self, vm: &VmRecord) -> OrchardResult<()> {
        self.running.lock().remove(&vm.name);
        Ok(())
    }

    async fn is_running(&self, vm: &VmRecord) -> OrchardResult<bool> {
        Ok(self.running.lock().contains(&vm.name))
    }
}

/// Runs each shim as a task with its own pid in the process table.
struct TaskSpawner {
    shim: Arc<ShimRuntime>,
    table: Arc<ProcessTable>,
    next_pid: AtomicU32,
}

impl ShimSpawner for TaskSpawner {
    fn spawn(&self, name: &str) -> OrchardResult<u32> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        self.table.alive.lock().insert(pid);
        self.table.shutdown.lock().insert(pid, token.clone());

        let shim = self.shim.clone();
        let table = self.table.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let _ = shim.run(&name, pid, token).await;
            table.exit(pid);
        });
        Ok(pid)
    }
}

struct NoIso;

impl IsoBuilder for NoIso {
    fn build(&self, _src_dir: &Path, _dst: &Path) -> OrchardResult<()> {
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    orchard: Orchard,
    store: Arc<SqliteVmStore>,
    runstate: RunState,
    table: Arc<ProcessTable>,
    provider: Arc<FakeProvider>,
}

fn create_harness(ready_timeout: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let layout = FilesystemLayout::new(dir.path().to_path_buf());
    layout.prepare().unwrap();

    let store = Arc::new(SqliteVmStore::open(layout.clone()).unwrap());
    store
        .save(&VmRecord::new("vm-001", Utc::now()))
        .unwrap();

    let table = Arc::new(ProcessTable::default());
    let provider = Arc::new(FakeProvider::default());
    let runstate = RunState::with_processes(layout.clone(), table.clone())
        .with_poll_interval(Duration::from_millis(10));

    let shim = Arc::new(ShimRuntime::new(
        store.clone(),
        runstate.clone(),
        provider.clone(),
    ));
    let spawner = Arc::new(TaskSpawner {
        shim,
        table: table.clone(),
        next_pid: AtomicU32::new(7001),
    });
    let launcher = ShimController::new(runstate.clone(), spawner, ready_timeout);

    let orchard = Orchard::new(
        store.clone(),
        Arc::new(launcher),
        Arc::new(FsArtifacts::new(layout)),
        Arc::new(CloudInitSeed::new(Box::new(NoIso))),
    );

    Harness {
        _dir: dir,
        orchard,
        store,
        runstate,
        table,
        provider,
    }
}

async fn wait_for_exit(table: &ProcessTable, pid: u32) {
    for _ in 0..200 {
        if !table.is_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("shim {} did not exit", pid);
}

#[tokio::test]
async fn test_start_reports_shim_pid_and_running_status() {
    let h = create_harness(Duration::from_secs(5));

    let vm = h.orchard.start("vm-001").await.unwrap();
    let pid = vm.pid.unwrap();
    assert_eq!(pid, 7001);

    assert!(h.runstate.is_ready("vm-001"));
    assert_eq!(h.runstate.read_pid("vm-001").unwrap(), pid);
    assert!(h.provider.running.lock().contains("vm-001"));

    let report = h.orchard.status("vm-001").await.unwrap();
    assert!(report.running);
    assert_eq!(report.pid, Some(pid));
    assert_eq!(h.store.load("vm-001").unwrap().status, VmStatus::Running);

    h.orchard.stop("vm-001").await.unwrap();
    wait_for_exit(&h.table, pid).await;

    assert!(!h.runstate.is_ready("vm-001"));
    assert!(!h.runstate.is_locked("vm-001"));
    assert!(!h.provider.running.lock().contains("vm-001"));
    assert!(!h.orchard.status("vm-001").await.unwrap().running);
    assert_eq!(h.store.load("vm-001").unwrap().pid, None);
}

#[tokio::test]
async fn test_backend_failure_times_out_then_recovers() {
    let h = create_harness(Duration::from_millis(300));
    h.provider.fail.store(true, Ordering::SeqCst);

    let err = h.orchard.start("vm-001").await.unwrap_err();
    assert!(matches!(err, OrchardError::ReadinessTimeout { .. }));
    wait_for_exit(&h.table, 7001).await;

    // Residual pid marker of the dead shim, no ready marker, lock released
    assert_eq!(h.runstate.read_pid("vm-001").unwrap(), 7001);
    assert!(!h.runstate.is_ready("vm-001"));
    assert!(!h.orchard.status("vm-001").await.unwrap().running);

    h.provider.fail.store(false, Ordering::SeqCst);
    let vm = h.orchard.start("vm-001").await.unwrap();
    assert_eq!(vm.pid, Some(7002));
    assert_eq!(h.runstate.read_pid("vm-001").unwrap(), 7002);
}

#[tokio::test]
async fn test_delete_running_vm_requires_force() {
    let h = create_harness(Duration::from_secs(5));
    let pid = h.orchard.start("vm-001").await.unwrap().pid.unwrap();

    let err = h.orchard.delete("vm-001", false).await.unwrap_err();
    assert!(matches!(err, OrchardError::InvalidState(_)));
    assert!(h.table.is_alive(pid));

    h.orchard.delete("vm-001", true).await.unwrap();
    wait_for_exit(&h.table, pid).await;

    assert!(matches!(
        h.store.load("vm-001"),
        Err(OrchardError::NotFound(_))
    ));
    assert!(h.orchard.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_start_is_refused_while_running() {
    let h = create_harness(Duration::from_secs(5));
    h.orchard.start("vm-001").await.unwrap();

    let err = h.orchard.start("vm-001").await.unwrap_err();
    assert!(matches!(err, OrchardError::LockHeld(_)));
    // Only one shim was ever spawned
    assert_eq!(h.table.alive.lock().len(), 1);
}

#[tokio::test]
async fn test_stop_when_never_started_is_noop() {
    let h = create_harness(Duration::from_secs(5));
    h.orchard.stop("vm-001").await.unwrap();
    assert_eq!(h.store.load("vm-001").unwrap().status, VmStatus::Stopped);
}

#[tokio::test]
async fn test_start_cancelled_while_waiting() {
    let h = create_harness(Duration::from_secs(30));
    h.provider.fail.store(true, Ordering::SeqCst);

    let token = h.orchard.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = h.orchard.start("vm-001").await.unwrap_err();
    assert!(matches!(err, OrchardError::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_overlapping_starts_have_exactly_one_winner() {
    let h = create_harness(Duration::from_secs(5));

    // Both calls pass the live-pid check before either shim has published a marker
    let (first, second) = tokio::join!(h.orchard.start("vm-001"), h.orchard.start("vm-001"));

    let (winner, loser) = match (first, second) {
        (Ok(vm), Err(e)) | (Err(e), Ok(vm)) => (vm, e),
        (first, second) => panic!("expected one winner, got {:?} and {:?}", first, second),
    };
    assert!(matches!(loser, OrchardError::LockHeld(_)));

    let pid = winner.pid.unwrap();
    assert!(h.runstate.is_ready("vm-001"));
    assert_eq!(h.runstate.read_pid("vm-001").unwrap(), pid);
    assert_eq!(h.store.load("vm-001").unwrap().pid, Some(pid));
    assert_eq!(h.store.load("vm-001").unwrap().status, VmStatus::Running);

    // The losing shim exits once it fails to take the lock
    for other in [7001, 7002].into_iter().filter(|p| *p != pid) {
        wait_for_exit(&h.table, other).await;
    }
    assert_eq!(*h.table.alive.lock(), HashSet::from([pid]));
}
