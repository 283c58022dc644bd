//! Filesystem layout of the orchard home directory.
//!
//! ```text
//! <home>/
//!   db/orchard.db
//!   logs/
//!   vms/<name>/
//!     vm.pid  vm.ready  vm.lock.d/  console.sock
//!     disk.img  nvram.bin  seed.iso  serial.log  vfkit.log  shim.log
//! ```

use std::path::{Path, PathBuf};

use super::constants::{dirs, filenames};

/// Root of all orchard state.
#[derive(Debug, Clone)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn vms_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::VMS)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::DB)
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join(filenames::DATABASE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS)
    }

    /// Directory holding both the resources and the runtime markers of one VM.
    pub fn vm_dir(&self, name: &str) -> PathBuf {
        self.vms_dir().join(name)
    }

    pub fn runtime_paths(&self, name: &str) -> RuntimePaths {
        RuntimePaths::new(self.vm_dir(name))
    }

    /// Create the top-level directories.
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.vms_dir())?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Ephemeral runtime artifacts of one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub dir: PathBuf,
    pub pid_file: PathBuf,
    pub ready_file: PathBuf,
    pub lock_dir: PathBuf,
    pub console_socket: PathBuf,
}

impl RuntimePaths {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            pid_file: dir.join(filenames::PID),
            ready_file: dir.join(filenames::READY),
            lock_dir: dir.join(filenames::LOCK_DIR),
            console_socket: dir.join(filenames::CONSOLE_SOCKET),
            dir,
        }
    }
}
