//! Process and filesystem helpers.

pub mod fs;
pub mod process;

pub use process::{HostProcesses, ProcessControl, is_process_alive, terminate_process};
