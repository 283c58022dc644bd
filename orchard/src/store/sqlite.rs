//! SQLite-backed VM store.

use orchard_shared::{OrchardError, OrchardResult};

use super::{VmStore, format_name};
use crate::db::{Database, VmTable};
use crate::runtime::{FilesystemLayout, RuntimePaths, VmRecord};

/// Store shared by the controller and shim processes through one database file.
#[derive(Debug, Clone)]
pub struct SqliteVmStore {
    table: VmTable,
    layout: FilesystemLayout,
}

impl SqliteVmStore {
    pub fn new(db: Database, layout: FilesystemLayout) -> Self {
        Self {
            table: VmTable::new(db),
            layout,
        }
    }

    /// Open the database at the layout's default location.
    pub fn open(layout: FilesystemLayout) -> OrchardResult<Self> {
        let db = Database::open(&layout.db_path()).map_err(|e| {
            OrchardError::Storage(format!(
                "Failed to initialize database at {}: {}",
                layout.db_path().display(),
                e
            ))
        })?;
        Ok(Self::new(db, layout))
    }
}

impl VmStore for SqliteVmStore {
    fn next_name(&self) -> OrchardResult<String> {
        // Skip names still owned by an existing record
        loop {
            let name = format_name(self.table.next_sequence()?);
            if self.table.get(&name)?.is_none() {
                return Ok(name);
            }
        }
    }

    fn save(&self, vm: &VmRecord) -> OrchardResult<()> {
        tracing::trace!(vm = %vm.name, status = %vm.status, pid = ?vm.pid, "Saving vm record");
        self.table.upsert(vm)
    }

    fn load(&self, name: &str) -> OrchardResult<VmRecord> {
        self.table
            .get(name)?
            .ok_or_else(|| OrchardError::NotFound(format!("vm {} not found", name)))
    }

    fn delete(&self, name: &str) -> OrchardResult<()> {
        if !self.table.remove(name)? {
            tracing::debug!(vm = %name, "Delete of unknown vm record");
        }
        Ok(())
    }

    fn list(&self) -> OrchardResult<Vec<VmRecord>> {
        self.table.list()
    }

    fn runtime_paths(&self, name: &str) -> RuntimePaths {
        self.layout.runtime_paths(name)
    }
}
