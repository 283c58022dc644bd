//! VM execution: controller-side launcher, the shim child runtime and hypervisor backends.

pub mod controller;
pub mod provider;
pub mod shim;

pub use controller::{ExecSpawner, ShimController, ShimLauncher, ShimSpawner};
pub use provider::{HandleRegistry, ProviderOptions, VfkitProvider, VirtualizationProvider};
pub use shim::{ShimRuntime, shutdown_on_signal};
