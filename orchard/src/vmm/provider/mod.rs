//! Virtualization backends driven by the shim.

mod registry;
mod vfkit;

pub use registry::HandleRegistry;
pub use vfkit::{ProviderOptions, VfkitProvider};

use async_trait::async_trait;
use orchard_shared::OrchardResult;

use crate::runtime::VmRecord;

/// Hypervisor start/stop/liveness for one host.
///
/// Implementations keep per-VM handles in a [`HandleRegistry`] they are given, never in
/// process-wide state.
#[async_trait]
pub trait VirtualizationProvider: Send + Sync {
    /// Start the VM. Returns the backend's own pid when it runs out of process.
    ///
    /// Errors are reported as `BackendStart`.
    async fn start_vm(&self, vm: &VmRecord) -> OrchardResult<Option<u32>>;

    /// Stop the VM. Stopping an unknown VM is a no-op.
    async fn stop_vm(&self, vm: &VmRecord) -> OrchardResult<()>;

    async fn is_running(&self, vm: &VmRecord) -> OrchardResult<bool>;
}
