//! Persisted VM record and status types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use orchard_shared::OrchardError;
use serde::{Deserialize, Serialize};

/// Last-known lifecycle transition of a VM.
///
/// This is a cache. Liveness is always re-derived from the runtime markers and the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    #[default]
    Stopped,
    Running,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Stopped => "stopped",
            VmStatus::Running => "running",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmStatus {
    type Err = OrchardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" | "" => Ok(VmStatus::Stopped),
            "running" => Ok(VmStatus::Running),
            other => Err(OrchardError::InvalidArgument(format!(
                "unknown vm status: {}",
                other
            ))),
        }
    }
}

/// Persisted description of one VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    // === Identity ===
    /// Unique, stable name. Keys every runtime path.
    pub name: String,
    pub created_at: DateTime<Utc>,

    // === Hardware ===
    pub cpus: u32,
    pub memory_mib: u64,
    pub disk_size_gib: u64,
    pub mac_address: Option<String>,
    pub hostname: String,

    // === Resources (staged by the artifacts preparer) ===
    pub base_image: PathBuf,
    pub disk_path: Option<PathBuf>,
    pub efi_vars_path: Option<PathBuf>,
    pub seed_iso_path: Option<PathBuf>,

    // === Cached runtime hint ===
    #[serde(default)]
    pub status: VmStatus,
    /// Shim pid when last known to be running.
    #[serde(default)]
    pub pid: Option<u32>,
}

impl VmRecord {
    /// A stopped record with no staged resources.
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            hostname: name.clone(),
            name,
            created_at,
            cpus: 2,
            memory_mib: 2048,
            disk_size_gib: 20,
            mac_address: None,
            base_image: PathBuf::new(),
            disk_path: None,
            efi_vars_path: None,
            seed_iso_path: None,
            status: VmStatus::Stopped,
            pid: None,
        }
    }

    pub fn mark_running(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.status = VmStatus::Running;
    }

    pub fn mark_stopped(&mut self) {
        self.pid = None;
        self.status = VmStatus::Stopped;
    }
}
