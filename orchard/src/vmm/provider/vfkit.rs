//! Backend driving the `vfkit` hypervisor CLI.
//!
//! The shim runs `vfkit` as its own child so the VM lives exactly as long as the shim
//! keeps it. vfkit validates its configuration at startup, so an exit during a short
//! grace period is reported as a start failure.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchard_shared::{OrchardError, OrchardResult};
use tokio::process::{Child, Command};

use super::{HandleRegistry, VirtualizationProvider};
use crate::runtime::constants::{envs, filenames};
use crate::runtime::{FilesystemLayout, VmRecord};
use crate::util::process::{HostProcesses, ProcessControl};

/// Settings for the vfkit backend.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// vfkit executable; `ORCHARD_VFKIT` or `vfkit` from `PATH`.
    pub binary: PathBuf,
    /// How long vfkit must survive after spawn to count as started.
    pub startup_grace: Duration,
    /// How long to wait after SIGTERM before killing vfkit.
    pub stop_timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        let binary = std::env::var_os(envs::VFKIT)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("vfkit"));
        Self {
            binary,
            startup_grace: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs each VM as a `vfkit` child process.
pub struct VfkitProvider {
    options: ProviderOptions,
    layout: FilesystemLayout,
    handles: Arc<HandleRegistry<Child>>,
}

impl VfkitProvider {
    pub fn new(
        options: ProviderOptions,
        layout: FilesystemLayout,
        handles: Arc<HandleRegistry<Child>>,
    ) -> Self {
        Self {
            options,
            layout,
            handles,
        }
    }

    /// Command-line arguments for `vm`.
    fn build_args(&self, vm: &VmRecord) -> OrchardResult<Vec<String>> {
        let efi_vars = vm.efi_vars_path.as_ref().ok_or_else(|| {
            OrchardError::BackendStart(format!("{} has no EFI variable store", vm.name))
        })?;
        let disk = vm
            .disk_path
            .as_ref()
            .ok_or_else(|| OrchardError::BackendStart(format!("{} has no disk", vm.name)))?;
        let vm_dir = self.layout.vm_dir(&vm.name);

        // An empty or missing store must be created by vfkit on first boot
        let create_store = std::fs::metadata(efi_vars)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let mut bootloader = format!("efi,variable-store={}", efi_vars.display());
        if create_store {
            bootloader.push_str(",create");
        }

        let mut args = vec![
            "--cpus".to_string(),
            vm.cpus.to_string(),
            "--memory".to_string(),
            vm.memory_mib.to_string(),
            "--bootloader".to_string(),
            bootloader,
        ];

        let mut device = |spec: String| {
            args.push("--device".to_string());
            args.push(spec);
        };
        device(format!("virtio-blk,path={}", disk.display()));
        if let Some(seed) = vm.seed_iso_path.as_ref().filter(|p| p.is_file()) {
            device(format!("virtio-blk,path={},readonly", seed.display()));
        }
        device(format!(
            "virtio-serial,logFilePath={}",
            vm_dir.join(filenames::SERIAL_LOG).display()
        ));
        match &vm.mac_address {
            Some(mac) => device(format!("virtio-net,nat,mac={}", mac)),
            None => device("virtio-net,nat".to_string()),
        }
        device("virtio-rng".to_string());

        Ok(args)
    }

    fn log_stdio(&self, vm: &VmRecord) -> OrchardResult<(Stdio, Stdio)> {
        let vm_dir = self.layout.vm_dir(&vm.name);
        std::fs::create_dir_all(&vm_dir)?;
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(vm_dir.join(filenames::BACKEND_LOG))?;
        let err = log.try_clone()?;
        Ok((Stdio::from(log), Stdio::from(err)))
    }
}

#[async_trait]
impl VirtualizationProvider for VfkitProvider {
    async fn start_vm(&self, vm: &VmRecord) -> OrchardResult<Option<u32>> {
        if self.handles.contains(&vm.name) {
            return Err(OrchardError::BackendStart(format!(
                "{} already has a running backend",
                vm.name
            )));
        }

        let args = self.build_args(vm)?;
        let (stdout, stderr) = self.log_stdio(vm)?;
        tracing::info!(
            vm = %vm.name,
            binary = %self.options.binary.display(),
            args = ?args,
            "Starting vfkit"
        );

        let mut child = Command::new(&self.options.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OrchardError::BackendStart(format!(
                    "failed to spawn {}: {}",
                    self.options.binary.display(),
                    e
                ))
            })?;

        match tokio::time::timeout(self.options.startup_grace, child.wait()).await {
            Ok(Ok(status)) => Err(OrchardError::BackendStart(format!(
                "vfkit exited during startup ({}); see {}",
                describe_exit(status),
                self.layout
                    .vm_dir(&vm.name)
                    .join(filenames::BACKEND_LOG)
                    .display()
            ))),
            Ok(Err(e)) => Err(OrchardError::BackendStart(format!(
                "failed to wait on vfkit: {}",
                e
            ))),
            Err(_) => {
                let pid = child.id();
                tracing::info!(vm = %vm.name, backend_pid = ?pid, "vfkit running");
                self.handles.insert(&vm.name, child);
                Ok(pid)
            }
        }
    }

    async fn stop_vm(&self, vm: &VmRecord) -> OrchardResult<()> {
        let Some(mut child) = self.handles.take(&vm.name) else {
            tracing::debug!(vm = %vm.name, "No vfkit handle to stop");
            return Ok(());
        };

        if let Some(pid) = child.id() {
            match HostProcesses.terminate(pid) {
                Ok(()) | Err(OrchardError::ProcessAlreadyGone(_)) => {}
                Err(e) => tracing::warn!(vm = %vm.name, error = %e, "SIGTERM to vfkit failed"),
            }
        }

        match tokio::time::timeout(self.options.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(vm = %vm.name, status = %describe_exit(status), "vfkit exited");
                Ok(())
            }
            Ok(Err(e)) => Err(OrchardError::Engine(format!("failed to wait on vfkit: {}", e))),
            Err(_) => {
                tracing::warn!(
                    vm = %vm.name,
                    timeout = ?self.options.stop_timeout,
                    "vfkit ignored SIGTERM, killing"
                );
                child
                    .kill()
                    .await
                    .map_err(|e| OrchardError::Engine(format!("failed to kill vfkit: {}", e)))
            }
        }
    }

    async fn is_running(&self, vm: &VmRecord) -> OrchardResult<bool> {
        Ok(self
            .handles
            .with(&vm.name, |child| matches!(child.try_wait(), Ok(None)))
            .unwrap_or(false))
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
