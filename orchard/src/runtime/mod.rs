//! Configuration, filesystem layout and core data types.

pub mod clock;
pub mod constants;
pub mod layout;
pub mod options;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use layout::{FilesystemLayout, RuntimePaths};
pub use options::OrchardOptions;
pub use types::{VmRecord, VmStatus};
