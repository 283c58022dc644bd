//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Orchard - lightweight VMs on this host
#[derive(Parser, Debug)]
#[command(name = "orchard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// State directory (defaults to ORCHARD_HOME, then ~/.orchard)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Print results and logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a VM from a base image
    Up(UpArgs),

    /// Start a VM and wait until it is ready
    Start {
        name: String,
        /// Seconds to wait for the VM to become ready
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Ask a running VM to shut down
    Stop { name: String },

    /// Show whether a VM is running
    Status { name: String },

    /// Delete a VM and its disks
    Delete {
        name: String,
        /// Stop the VM first if it is running
        #[arg(short, long)]
        force: bool,
    },

    /// List VMs
    List,

    /// Resolve a VM's address via mDNS (NAME.local)
    Ip { name: String },

    /// Supervise one VM (started by `orchard start`)
    #[command(name = "_shim", hide = true)]
    Shim {
        #[arg(long = "vm")]
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct UpArgs {
    /// Base disk image (raw or qcow2)
    #[arg(long)]
    pub image: PathBuf,

    #[arg(long, default_value_t = 2)]
    pub cpus: u32,

    /// Memory in MiB
    #[arg(long, default_value_t = 2048)]
    pub memory: u64,

    /// Disk size in GiB
    #[arg(long, default_value_t = 20)]
    pub disk_size: u64,

    /// SSH public key (defaults to ~/.ssh/id_ed25519.pub, then ~/.ssh/id_rsa.pub)
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,
}
