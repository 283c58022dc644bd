//! Filenames, directory names and protocol timings.

use std::time::Duration;

/// Names of the files that make up a VM directory.
pub mod filenames {
    pub const PID: &str = "vm.pid";
    pub const READY: &str = "vm.ready";
    pub const LOCK_DIR: &str = "vm.lock.d";
    pub const CONSOLE_SOCKET: &str = "console.sock";

    pub const DISK: &str = "disk.img";
    pub const EFI_VARS: &str = "nvram.bin";
    pub const SEED_ISO: &str = "seed.iso";
    pub const SERIAL_LOG: &str = "serial.log";
    pub const BACKEND_LOG: &str = "vfkit.log";
    pub const SHIM_LOG: &str = "shim.log";

    pub const DATABASE: &str = "orchard.db";

    /// Suffix for the temporary file written before an atomic rename.
    pub const TMP_SUFFIX: &str = ".tmp";
}

/// Top-level directories under the orchard home.
pub mod dirs {
    pub const VMS: &str = "vms";
    pub const DB: &str = "db";
    pub const LOGS: &str = "logs";
}

/// Environment variables read by orchard.
pub mod envs {
    pub const HOME: &str = "ORCHARD_HOME";
    pub const VFKIT: &str = "ORCHARD_VFKIT";
    pub const RUST_LOG: &str = "RUST_LOG";
}

/// Hidden subcommand that runs the shim child.
pub const SHIM_SUBCOMMAND: &str = "_shim";

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Name prefix used for allocated VM names (`vm-001`).
pub const VM_NAME_PREFIX: &str = "vm-";
