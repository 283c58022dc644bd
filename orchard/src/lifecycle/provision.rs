//! Creating new VMs: image validation, SSH key discovery and first-boot resources.

use std::path::{Path, PathBuf};

use orchard_shared::{OrchardError, OrchardResult};
use serde::{Deserialize, Serialize};

use super::Orchard;
use crate::runtime::VmRecord;

/// Public keys tried, in order, when no key is given.
const SSH_KEY_CANDIDATES: [&str; 2] = ["id_ed25519.pub", "id_rsa.pub"];

/// Parameters for [`Orchard::up`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpParams {
    /// Base disk image, raw or qcow2.
    pub image: PathBuf,
    pub cpus: u32,
    pub memory_mib: u64,
    pub disk_size_gib: u64,
    /// SSH public key file. Discovered under `~/.ssh` when unset.
    pub ssh_key: Option<PathBuf>,
}

impl UpParams {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            cpus: 2,
            memory_mib: 2048,
            disk_size_gib: 20,
            ssh_key: None,
        }
    }

    fn validate(&self) -> OrchardResult<()> {
        if self.cpus == 0 {
            return Err(OrchardError::InvalidArgument("cpus must be at least 1".into()));
        }
        if self.memory_mib == 0 {
            return Err(OrchardError::InvalidArgument("memory must be non-zero".into()));
        }
        if self.disk_size_gib == 0 {
            return Err(OrchardError::InvalidArgument("disk size must be non-zero".into()));
        }
        Ok(())
    }
}

impl Orchard {
    /// Create a VM from a base image and persist it in the stopped state.
    pub async fn up(&self, params: UpParams) -> OrchardResult<VmRecord> {
        params.validate()?;

        let image = absolutize(&params.image)?;
        if !image.is_file() {
            return Err(OrchardError::InvalidArgument(format!(
                "image path invalid: {} is not a file",
                image.display()
            )));
        }
        let ssh_key_path = params.ssh_key.clone().or_else(|| self.detect_ssh_key());

        let name = self.store.next_name()?;
        let mut vm = VmRecord::new(name, self.clock.now());
        vm.cpus = params.cpus;
        vm.memory_mib = params.memory_mib;
        vm.disk_size_gib = params.disk_size_gib;
        vm.base_image = image;
        vm.mac_address = Some(random_mac());

        self.artifacts.prepare(&mut vm)?;

        let Some(ssh_key_path) = ssh_key_path else {
            return Err(OrchardError::InvalidArgument(
                "no SSH public key found; specify --ssh-key or create ~/.ssh/id_ed25519.pub"
                    .to_string(),
            ));
        };
        let ssh_key = std::fs::read_to_string(&ssh_key_path).map_err(|e| {
            OrchardError::InvalidArgument(format!(
                "reading ssh key {}: {}",
                ssh_key_path.display(),
                e
            ))
        })?;

        let seed_path = vm.seed_iso_path.clone().ok_or_else(|| {
            OrchardError::Internal(format!("artifacts for {} have no seed path", vm.name))
        })?;
        self.seed.generate(&vm, &ssh_key, &seed_path)?;

        self.store.save(&vm)?;
        tracing::info!(
            vm = %vm.name,
            image = %vm.base_image.display(),
            cpus = vm.cpus,
            memory_mib = vm.memory_mib,
            "Created VM"
        );
        Ok(vm)
    }

    fn detect_ssh_key(&self) -> Option<PathBuf> {
        let ssh_dir = self.ssh_dir.as_ref()?;
        SSH_KEY_CANDIDATES
            .iter()
            .map(|candidate| ssh_dir.join(candidate))
            .find(|path| path.is_file())
    }
}

fn absolutize(path: &Path) -> OrchardResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Random unicast, locally administered MAC address.
pub(crate) fn random_mac() -> String {
    let mut bytes: [u8; 6] = rand::random();
    bytes[0] = (bytes[0] | 0x02) & 0xfe;
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
