//! VM metadata persistence and name allocation.

mod mem;
mod sqlite;

pub use mem::MemVmStore;
pub use sqlite::SqliteVmStore;

use orchard_shared::OrchardResult;

use crate::runtime::constants::VM_NAME_PREFIX;
use crate::runtime::{RuntimePaths, VmRecord};

/// Persisted VM records.
///
/// `load` fails with `NotFound` for unknown names. `list` is ordered by creation time.
pub trait VmStore: Send + Sync {
    /// Allocate the next unused name (`vm-001`, `vm-002`, ...).
    fn next_name(&self) -> OrchardResult<String>;

    fn save(&self, vm: &VmRecord) -> OrchardResult<()>;

    fn load(&self, name: &str) -> OrchardResult<VmRecord>;

    /// Remove the record. Unknown names are not an error.
    fn delete(&self, name: &str) -> OrchardResult<()>;

    fn list(&self) -> OrchardResult<Vec<VmRecord>>;

    /// Location of the VM's runtime markers.
    fn runtime_paths(&self, name: &str) -> RuntimePaths;
}

pub(crate) fn format_name(seq: u64) -> String {
    format!("{}{:03}", VM_NAME_PREFIX, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_name() {
        assert_eq!(format_name(1), "vm-001");
        assert_eq!(format_name(42), "vm-042");
        assert_eq!(format_name(1234), "vm-1234");
    }
}
