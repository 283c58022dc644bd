//! `cidata` ISO creation through host tools.

use std::path::Path;
use std::process::{Command, Stdio};

use orchard_shared::{OrchardError, OrchardResult};

/// Volume label cloud-init's NoCloud datasource looks for.
pub const VOLUME_LABEL: &str = "CIDATA";

/// Turns a directory of NoCloud files into an ISO image.
pub trait IsoBuilder: Send + Sync {
    fn build(&self, src_dir: &Path, dst: &Path) -> OrchardResult<()>;
}

/// `hdiutil makehybrid`, available on every macOS host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HdiutilBuilder;

impl HdiutilBuilder {
    fn command(src_dir: &Path, dst: &Path) -> Command {
        let mut cmd = Command::new("hdiutil");
        cmd.args(["makehybrid", "-iso", "-joliet", "-default-volume-name", VOLUME_LABEL])
            .arg(src_dir)
            .arg("-o")
            .arg(dst);
        cmd
    }
}

impl IsoBuilder for HdiutilBuilder {
    fn build(&self, src_dir: &Path, dst: &Path) -> OrchardResult<()> {
        // hdiutil refuses to overwrite
        crate::util::fs::remove_file_if_exists(dst)?;
        run("hdiutil makehybrid", Self::command(src_dir, dst))
    }
}

/// `genisoimage`, for hosts without hdiutil.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenisoimageBuilder;

impl GenisoimageBuilder {
    fn command(src_dir: &Path, dst: &Path) -> Command {
        let mut cmd = Command::new("genisoimage");
        cmd.arg("-output")
            .arg(dst)
            .args(["-volid", VOLUME_LABEL, "-joliet", "-rock"])
            .arg(src_dir);
        cmd
    }
}

impl IsoBuilder for GenisoimageBuilder {
    fn build(&self, src_dir: &Path, dst: &Path) -> OrchardResult<()> {
        run("genisoimage", Self::command(src_dir, dst))
    }
}

/// The builder native to this host.
pub fn host_builder() -> Box<dyn IsoBuilder> {
    if cfg!(target_os = "macos") {
        Box::new(HdiutilBuilder)
    } else {
        Box::new(GenisoimageBuilder)
    }
}

fn run(tool: &str, mut cmd: Command) -> OrchardResult<()> {
    tracing::debug!(command = ?cmd, "Building seed ISO");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| OrchardError::Engine(format!("failed to run {}: {}", tool, e)))?;
    if !output.status.success() {
        return Err(OrchardError::Engine(format!(
            "{} failed ({}): {}",
            tool,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
