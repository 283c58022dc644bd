//! NoCloud seed generation for first boot.
//!
//! The seed sets the hostname, installs the SSH key for a passwordless-sudo user and enables
//! avahi so the guest answers to `NAME.local`.

mod iso;

pub use iso::{GenisoimageBuilder, HdiutilBuilder, IsoBuilder, VOLUME_LABEL, host_builder};

use std::path::Path;

use orchard_shared::{OrchardError, OrchardResult};
use serde::{Deserialize, Serialize};

use crate::runtime::VmRecord;

/// Login user created in the guest.
pub const GUEST_USER: &str = "fedora";

/// Builds `seed.iso` images from a VM record and an SSH public key.
pub struct CloudInitSeed {
    builder: Box<dyn IsoBuilder>,
}

impl Default for CloudInitSeed {
    fn default() -> Self {
        Self::new(host_builder())
    }
}

impl CloudInitSeed {
    pub fn new(builder: Box<dyn IsoBuilder>) -> Self {
        Self { builder }
    }

    /// Write `user-data` and `meta-data` to a scratch directory and build `dst` from it.
    pub fn generate(&self, vm: &VmRecord, ssh_key: &str, dst: &Path) -> OrchardResult<()> {
        let ssh_key = ssh_key.trim();
        if ssh_key.is_empty() {
            return Err(OrchardError::InvalidArgument(
                "an SSH public key is required".to_string(),
            ));
        }

        let work_dir = tempfile::Builder::new()
            .prefix("orchard-seed-")
            .tempdir()?;
        std::fs::write(
            work_dir.path().join("user-data"),
            user_data(&vm.hostname, ssh_key)?,
        )?;
        std::fs::write(work_dir.path().join("meta-data"), meta_data(vm)?)?;

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.builder.build(work_dir.path(), dst)?;
        tracing::info!(vm = %vm.name, seed = %dst.display(), "Generated cloud-init seed");
        Ok(())
    }
}

/// `#cloud-config` document; field names are cloud-init's.
#[derive(Debug, Serialize, Deserialize)]
struct CloudConfig {
    preserve_hostname: bool,
    hostname: String,
    ssh_pwauth: bool,
    users: Vec<GuestUser>,
    package_update: bool,
    packages: Vec<String>,
    runcmd: Vec<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GuestUser {
    name: String,
    sudo: String,
    groups: String,
    shell: String,
    ssh_authorized_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MetaData<'a> {
    #[serde(rename = "instance-id")]
    instance_id: &'a str,
    #[serde(rename = "local-hostname")]
    local_hostname: &'a str,
}

/// One entry per non-blank line, so multi-key files install every key.
fn authorized_keys(ssh_key: &str) -> Vec<String> {
    ssh_key
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn user_data(hostname: &str, ssh_key: &str) -> OrchardResult<String> {
    let config = CloudConfig {
        preserve_hostname: false,
        hostname: hostname.to_string(),
        ssh_pwauth: false,
        users: vec![GuestUser {
            name: GUEST_USER.to_string(),
            sudo: "ALL=(ALL) NOPASSWD:ALL".to_string(),
            groups: "wheel".to_string(),
            shell: "/bin/bash".to_string(),
            ssh_authorized_keys: authorized_keys(ssh_key),
        }],
        package_update: true,
        packages: vec!["avahi".to_string(), "nss-mdns".to_string()],
        runcmd: vec![
            ["systemctl", "enable", "--now", "avahi-daemon"]
                .map(str::to_string)
                .to_vec(),
        ],
    };
    let body = serde_yaml::to_string(&config).map_err(yaml_err)?;
    Ok(format!("#cloud-config\n{}", body))
}

fn meta_data(vm: &VmRecord) -> OrchardResult<String> {
    serde_yaml::to_string(&MetaData {
        instance_id: &vm.name,
        local_hostname: &vm.hostname,
    })
    .map_err(yaml_err)
}

fn yaml_err(e: serde_yaml::Error) -> OrchardError {
    OrchardError::Internal(format!("failed to render cloud-init document: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Captures the seed directory contents instead of building an image.
    #[derive(Default)]
    struct CapturingBuilder {
        files: Arc<Mutex<HashMap<String, String>>>,
    }

    impl IsoBuilder for CapturingBuilder {
        fn build(&self, src_dir: &Path, dst: &Path) -> OrchardResult<()> {
            let mut files = self.files.lock();
            for entry in std::fs::read_dir(src_dir)? {
                let entry = entry?;
                files.insert(
                    entry.file_name().to_string_lossy().to_string(),
                    std::fs::read_to_string(entry.path())?,
                );
            }
            std::fs::write(dst, b"iso")?;
            Ok(())
        }
    }

    #[test]
    fn test_generate_writes_nocloud_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = Arc::new(Mutex::new(HashMap::new()));
        let seed = CloudInitSeed::new(Box::new(CapturingBuilder {
            files: files.clone(),
        }));
        let vm = VmRecord::new("vm-001", Utc::now());
        let dst = dir.path().join("vms/vm-001/seed.iso");

        seed.generate(&vm, "ssh-ed25519 AAAA test@host\n", &dst).unwrap();

        assert!(dst.is_file());
        let files = files.lock();
        let user = &files["user-data"];
        assert!(user.starts_with("#cloud-config\n"));
        let config: CloudConfig = serde_yaml::from_str(user).unwrap();
        assert_eq!(config.hostname, "vm-001");
        assert!(!config.ssh_pwauth);
        assert_eq!(config.users[0].name, GUEST_USER);
        assert_eq!(config.users[0].sudo, "ALL=(ALL) NOPASSWD:ALL");
        assert_eq!(
            config.users[0].ssh_authorized_keys,
            vec!["ssh-ed25519 AAAA test@host"]
        );
        assert!(config.packages.contains(&"nss-mdns".to_string()));
        assert_eq!(
            files["meta-data"],
            "instance-id: vm-001\nlocal-hostname: vm-001\n"
        );
    }

    #[test]
    fn test_generate_requires_key() {
        let dir = tempfile::tempdir().unwrap();
        let seed = CloudInitSeed::new(Box::new(CapturingBuilder::default()));
        let vm = VmRecord::new("vm-001", Utc::now());

        let err = seed
            .generate(&vm, "  \n", &dir.path().join("seed.iso"))
            .unwrap_err();
        assert!(matches!(err, OrchardError::InvalidArgument(_)));
    }

    #[test]
    fn test_user_data_installs_every_key_of_a_multi_key_file() {
        let keys = "ssh-ed25519 AAAA a@h\n\n  ssh-rsa BBBB b@h  \n";
        let user = user_data("vm-002", keys).unwrap();

        let config: CloudConfig = serde_yaml::from_str(&user).unwrap();
        assert_eq!(
            config.users[0].ssh_authorized_keys,
            vec!["ssh-ed25519 AAAA a@h", "ssh-rsa BBBB b@h"]
        );
        assert_eq!(
            config.runcmd,
            vec![vec!["systemctl", "enable", "--now", "avahi-daemon"]]
        );
    }
}
