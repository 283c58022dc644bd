//! Orchard runs lightweight VMs on a single host.
//!
//! Each running VM is supervised by a detached shim process. The controller (one per CLI
//! invocation) and the shims never talk to each other directly: they coordinate through
//! lock directories and marker files in the VM's directory, see [`runstate`].

pub mod artifacts;
pub mod cloudinit;
pub mod db;
pub mod lifecycle;
pub mod logging;
pub mod runstate;
pub mod runtime;
pub mod store;
pub mod util;
pub mod vmm;

pub use lifecycle::{Orchard, UpParams, VmStatusReport, VmSummary};
pub use logging::{LogOptions, init_logging};
pub use orchard_shared::{OrchardError, OrchardResult};
pub use runstate::{LockGuard, RunState};
pub use runtime::{FilesystemLayout, OrchardOptions, VmRecord, VmStatus};
pub use store::{MemVmStore, SqliteVmStore, VmStore};
pub use vmm::{ProviderOptions, ShimRuntime};
