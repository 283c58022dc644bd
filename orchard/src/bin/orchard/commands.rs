//! Command handlers.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use orchard::lifecycle::VmSummary;
use orchard::{Orchard, OrchardOptions, ProviderOptions, ShimRuntime, UpParams};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::cli::{Commands, UpArgs};

/// Output mode shared by every controller command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    fn emit(&self, value: serde_json::Value, text: impl FnOnce() -> String) {
        if self.json {
            println!("{}", value);
        } else {
            println!("{}", text());
        }
    }
}

pub async fn execute(command: Commands, mut options: OrchardOptions, out: Output) -> Result<()> {
    if let Commands::Start {
        timeout: Some(secs),
        ..
    } = &command
    {
        options.ready_timeout = Duration::from_secs(*secs);
    }

    let orchard = Orchard::open(&options)
        .with_context(|| format!("Failed to open {}", options.home_dir.display()))?;
    cancel_on_ctrl_c(orchard.cancel_token());

    match command {
        Commands::Up(args) => up(&orchard, args, out).await,
        Commands::Start { name, .. } => {
            let vm = orchard.start(&name).await?;
            let pid = vm.pid.unwrap_or_default();
            out.emit(json!({ "name": vm.name, "pid": pid }), || {
                format!("Started {} (pid {})", vm.name, pid)
            });
            Ok(())
        }
        Commands::Stop { name } => {
            orchard.stop(&name).await?;
            out.emit(json!({ "name": name, "stopped": true }), || {
                format!("Stopped {}", name)
            });
            Ok(())
        }
        Commands::Status { name } => {
            let report = orchard.status(&name).await?;
            out.emit(serde_json::to_value(&report)?, || match report.pid {
                Some(pid) => format!("{}: running (pid {})", report.name, pid),
                None => format!("{}: stopped", report.name),
            });
            Ok(())
        }
        Commands::Delete { name, force } => {
            orchard.delete(&name, force).await?;
            out.emit(json!({ "name": name, "deleted": true }), || {
                format!("Deleted {}", name)
            });
            Ok(())
        }
        Commands::List => {
            let vms = orchard.list().await?;
            out.emit(serde_json::to_value(&vms)?, || format_table(&vms));
            Ok(())
        }
        Commands::Ip { name } => {
            let ip = orchard.ip(&name).await?;
            out.emit(json!({ "name": name, "ip": ip.to_string() }), || {
                ip.to_string()
            });
            Ok(())
        }
        Commands::Shim { name } => bail!("shim for {} must run in its own process", name),
    }
}

async fn up(orchard: &Orchard, args: UpArgs, out: Output) -> Result<()> {
    let params = UpParams {
        image: args.image,
        cpus: args.cpus,
        memory_mib: args.memory,
        disk_size_gib: args.disk_size,
        ssh_key: args.ssh_key,
    };
    let vm = orchard.up(params).await?;
    out.emit(
        json!({
            "name": vm.name,
            "cpus": vm.cpus,
            "memory_mib": vm.memory_mib,
            "disk_size_gib": vm.disk_size_gib,
            "mac_address": vm.mac_address,
        }),
        || format!("Created VM {}", vm.name),
    );
    Ok(())
}

/// Entry point of the detached shim process.
pub async fn run_shim(name: &str, options: OrchardOptions) -> Result<()> {
    let shutdown = CancellationToken::new();
    orchard::vmm::shutdown_on_signal(shutdown.clone())?;

    let runtime = ShimRuntime::open(&options, ProviderOptions::default())?;
    runtime
        .run(name, std::process::id(), shutdown)
        .await
        .with_context(|| format!("Shim for {} failed", name))
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

fn format_table(vms: &[VmSummary]) -> String {
    let mut lines = vec![format!(
        "{:<12} {:<8} {:>8} {:>5} {:>9}",
        "NAME", "STATUS", "PID", "CPUS", "MEM(MiB)"
    )];
    for vm in vms {
        let pid = vm.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
        lines.push(format!(
            "{:<12} {:<8} {:>8} {:>5} {:>9}",
            vm.name, vm.status.as_str(), pid, vm.cpus, vm.memory_mib
        ));
    }
    lines.join("\n")
}
