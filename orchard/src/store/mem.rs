//! In-memory VM store.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;

use orchard_shared::{OrchardError, OrchardResult};

use super::{VmStore, format_name};
use crate::runtime::{FilesystemLayout, RuntimePaths, VmRecord};

/// Process-local store. Runtime paths still resolve under `layout` so the markers can be
/// exercised against a real directory.
#[derive(Debug)]
pub struct MemVmStore {
    inner: Mutex<MemInner>,
    layout: FilesystemLayout,
}

#[derive(Debug)]
struct MemInner {
    vms: HashMap<String, VmRecord>,
    next: u64,
}

impl MemVmStore {
    pub fn new(layout: FilesystemLayout) -> Self {
        Self {
            inner: Mutex::new(MemInner {
                vms: HashMap::new(),
                next: 1,
            }),
            layout,
        }
    }
}

impl Default for MemVmStore {
    fn default() -> Self {
        Self::new(FilesystemLayout::new(PathBuf::from("/mem")))
    }
}

impl VmStore for MemVmStore {
    fn next_name(&self) -> OrchardResult<String> {
        let mut inner = self.inner.lock();
        loop {
            let name = format_name(inner.next);
            inner.next += 1;
            if !inner.vms.contains_key(&name) {
                return Ok(name);
            }
        }
    }

    fn save(&self, vm: &VmRecord) -> OrchardResult<()> {
        self.inner.lock().vms.insert(vm.name.clone(), vm.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> OrchardResult<VmRecord> {
        self.inner
            .lock()
            .vms
            .get(name)
            .cloned()
            .ok_or_else(|| OrchardError::NotFound(format!("vm {} not found", name)))
    }

    fn delete(&self, name: &str) -> OrchardResult<()> {
        self.inner.lock().vms.remove(name);
        Ok(())
    }

    fn list(&self) -> OrchardResult<Vec<VmRecord>> {
        let mut vms: Vec<_> = self.inner.lock().vms.values().cloned().collect();
        vms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(vms)
    }

    fn runtime_paths(&self, name: &str) -> RuntimePaths {
        self.layout.runtime_paths(name)
    }
}
