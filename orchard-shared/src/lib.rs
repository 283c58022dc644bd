//! Types shared between the orchard library, its CLI and the shim entry point.

pub mod errors;

pub use errors::{OrchardError, OrchardResult};
