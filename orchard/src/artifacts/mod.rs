//! Per-VM disk resources.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::Path;

use orchard_shared::{OrchardError, OrchardResult};

use crate::runtime::constants::filenames;
use crate::runtime::{FilesystemLayout, VmRecord};

const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";
const GIB: u64 = 1024 * 1024 * 1024;

/// Creates the files a VM boots from and records their paths on the record.
pub trait VmArtifacts: Send + Sync {
    fn prepare(&self, vm: &mut VmRecord) -> OrchardResult<()>;
}

/// Artifacts stored in the VM directory under the orchard home.
#[derive(Debug, Clone)]
pub struct FsArtifacts {
    layout: FilesystemLayout,
}

impl FsArtifacts {
    pub fn new(layout: FilesystemLayout) -> Self {
        Self { layout }
    }
}

impl VmArtifacts for FsArtifacts {
    fn prepare(&self, vm: &mut VmRecord) -> OrchardResult<()> {
        let vm_dir = self.layout.vm_dir(&vm.name);
        std::fs::create_dir_all(&vm_dir)?;

        let disk_path = vm_dir.join(filenames::DISK);
        let efi_vars_path = vm_dir.join(filenames::EFI_VARS);
        let seed_iso_path = vm_dir.join(filenames::SEED_ISO);

        copy_durable(&vm.base_image, &disk_path).map_err(|e| {
            OrchardError::Storage(format!(
                "failed to copy base image {}: {}",
                vm.base_image.display(),
                e
            ))
        })?;

        let target = vm.disk_size_gib.saturating_mul(GIB);
        if is_qcow2(&disk_path)? {
            tracing::debug!(vm = %vm.name, "Base image is qcow2, leaving size unchanged");
        } else if grow_sparse(&disk_path, target)? {
            tracing::info!(vm = %vm.name, size_gib = vm.disk_size_gib, "Grew disk image");
        }

        // Empty store; vfkit initialises it on first boot
        File::create(&efi_vars_path)?;

        vm.disk_path = Some(disk_path);
        vm.efi_vars_path = Some(efi_vars_path);
        vm.seed_iso_path = Some(seed_iso_path);
        Ok(())
    }
}

fn copy_durable(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut input = File::open(src)?;
    let mut output = File::create(dst)?;
    let copied = std::io::copy(&mut input, &mut output)?;
    output.sync_all()?;
    Ok(copied)
}

fn is_qcow2(path: &Path) -> OrchardResult<bool> {
    let mut magic = [0u8; 4];
    let mut reader = BufReader::new(File::open(path)?);
    match reader.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == QCOW2_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Extend a raw image to `size` bytes without allocating blocks. Never shrinks.
fn grow_sparse(path: &Path, size: u64) -> OrchardResult<bool> {
    let file = OpenOptions::new().write(true).open(path)?;
    if file.metadata()?.len() >= size {
        return Ok(false);
    }
    file.set_len(size)?;
    file.sync_all()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_vm(dir: &TempDir, image: &[u8]) -> (FsArtifacts, VmRecord) {
        let base = dir.path().join("base.img");
        std::fs::write(&base, image).unwrap();

        let mut vm = VmRecord::new("vm-001", Utc::now());
        vm.base_image = base;
        vm.disk_size_gib = 1;
        let artifacts = FsArtifacts::new(FilesystemLayout::new(dir.path().join("home")));
        (artifacts, vm)
    }

    #[test]
    fn test_prepare_raw_image() {
        let dir = tempfile::tempdir().unwrap();
        let (artifacts, mut vm) = create_test_vm(&dir, b"raw disk contents");

        artifacts.prepare(&mut vm).unwrap();

        let disk = vm.disk_path.clone().unwrap();
        assert!(disk.ends_with("vms/vm-001/disk.img"));
        assert_eq!(std::fs::metadata(&disk).unwrap().len(), GIB);
        let mut head = vec![0u8; 17];
        File::open(&disk).unwrap().read_exact(&mut head).unwrap();
        assert_eq!(head, b"raw disk contents");

        let nvram = vm.efi_vars_path.clone().unwrap();
        assert_eq!(std::fs::metadata(nvram).unwrap().len(), 0);
        // Seed path is recorded, the ISO itself comes from cloud-init generation
        assert!(vm.seed_iso_path.unwrap().ends_with("seed.iso"));
    }

    #[test]
    fn test_prepare_leaves_qcow2_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (artifacts, mut vm) = create_test_vm(&dir, b"QFI\xfb\x00\x00\x00\x03");

        artifacts.prepare(&mut vm).unwrap();
        assert_eq!(std::fs::metadata(vm.disk_path.unwrap()).unwrap().len(), 8);
    }

    #[test]
    fn test_prepare_missing_base_image() {
        let dir = tempfile::tempdir().unwrap();
        let (artifacts, mut vm) = create_test_vm(&dir, b"");
        vm.base_image = dir.path().join("missing.img");

        let err = artifacts.prepare(&mut vm).unwrap_err();
        assert!(matches!(err, OrchardError::Storage(_)));
        assert!(vm.disk_path.is_none());
    }

    #[test]
    fn test_grow_never_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        std::fs::write(&path, vec![1u8; 64]).unwrap();

        assert!(!grow_sparse(&path, 32).unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 64);
        assert!(grow_sparse(&path, 128).unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 128);
    }
}
