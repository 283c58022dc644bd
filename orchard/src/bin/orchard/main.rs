//! orchard CLI, and the hidden `_shim` entry that the CLI re-executes per VM.

use anyhow::Result;
use clap::Parser;
use orchard::runtime::constants::filenames;
use orchard::{FilesystemLayout, LogOptions, OrchardOptions, init_logging};

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::Output;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = OrchardOptions::resolve(cli.home.clone())?;

    match cli.command {
        Commands::Shim { name } => {
            let shim_log = FilesystemLayout::new(options.home_dir.clone())
                .vm_dir(&name)
                .join(filenames::SHIM_LOG);
            let _guard = init_logging(&LogOptions {
                verbose: cli.verbose,
                json: cli.json,
                file: Some(shim_log),
            })?;
            tracing::info!(vm = %name, pid = std::process::id(), "Shim starting");
            commands::run_shim(&name, options).await
        }
        command => {
            init_logging(&LogOptions {
                verbose: cli.verbose,
                json: cli.json,
                file: None,
            })?;
            commands::execute(command, options, Output { json: cli.json }).await
        }
    }
}
