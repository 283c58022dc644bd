//! Tracing subscriber setup for the CLI and the shim.

use std::path::PathBuf;

use orchard_shared::{OrchardError, OrchardResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where and how log events are written.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Lower the default level from `info` to `debug`. `RUST_LOG` still wins.
    pub verbose: bool,
    /// Emit stderr events as JSON lines.
    pub json: bool,
    /// Also append plain-text events to this file.
    pub file: Option<PathBuf>,
}

impl LogOptions {
    fn default_directive(&self) -> &'static str {
        if self.verbose {
            "orchard=debug"
        } else {
            "orchard=info"
        }
    }
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when `file` is set; dropping it flushes and stops the
/// background writer, so the caller keeps it alive for the life of the process.
pub fn init_logging(options: &LogOptions) -> OrchardResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));

    let stderr_layer = if options.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &options.file {
        Some(path) => {
            let (dir, file_name) = match (path.parent(), path.file_name()) {
                (Some(dir), Some(file_name)) => (dir, file_name),
                _ => {
                    return Err(OrchardError::Config(format!(
                        "invalid log file path {}",
                        path.display()
                    )));
                }
            };
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| OrchardError::Internal(format!("failed to install logger: {}", e)))?;

    Ok(guard)
}
