//! Process creation for shims.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use orchard_shared::{OrchardError, OrchardResult};

use crate::runtime::constants::{SHIM_SUBCOMMAND, envs};

/// Creates a shim process for a VM and returns its pid.
pub trait ShimSpawner: Send + Sync {
    fn spawn(&self, name: &str) -> OrchardResult<u32>;
}

/// Re-executes an orchard binary as `orchard --home <home> _shim --vm <name>`.
#[derive(Debug, Clone)]
pub struct ExecSpawner {
    exe: PathBuf,
    home: PathBuf,
}

impl ExecSpawner {
    pub fn new(exe: PathBuf, home: PathBuf) -> Self {
        Self { exe, home }
    }

    /// Spawner for the currently running executable.
    pub fn current(home: PathBuf) -> OrchardResult<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| OrchardError::Config(format!("cannot locate own executable: {}", e)))?;
        Ok(Self::new(exe, home))
    }

    fn command(&self, name: &str) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--home")
            .arg(&self.home)
            .arg(SHIM_SUBCOMMAND)
            .arg("--vm")
            .arg(name);

        // Pass RUST_LOG to subprocess if set
        if let Ok(rust_log) = std::env::var(envs::RUST_LOG) {
            cmd.env(envs::RUST_LOG, rust_log);
        }

        // Own process group so terminal signals aimed at the controller miss the shim
        cmd.process_group(0);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd
    }
}

impl ShimSpawner for ExecSpawner {
    fn spawn(&self, name: &str) -> OrchardResult<u32> {
        let mut child = self.command(name).spawn().map_err(|e| {
            let err_msg = format!(
                "Failed to spawn shim for {} at {}: {}",
                name,
                self.exe.display(),
                e
            );
            tracing::error!("{}", err_msg);
            OrchardError::Engine(err_msg)
        })?;
        let pid = child.id();

        // Reap the child whenever it exits so a long-lived controller leaves no zombies
        let reaper = std::thread::Builder::new()
            .name(format!("reap-{}", name))
            .spawn(move || {
                let _ = child.wait();
            });
        if let Err(e) = reaper {
            tracing::warn!(vm = %name, pid = pid, error = %e, "Failed to start shim reaper");
        }

        tracing::debug!(vm = %name, pid = pid, "Spawned shim");
        Ok(pid)
    }
}
