//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use orchard_shared::{OrchardError, OrchardResult};

use super::constants::{DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT, envs};

/// Options shared by the controller and the shim.
#[derive(Debug, Clone)]
pub struct OrchardOptions {
    /// Root directory for the database and per-VM directories. Must be absolute.
    pub home_dir: PathBuf,
    /// Upper bound on how long `start` waits for the shim's ready marker.
    pub ready_timeout: Duration,
    /// Interval between ready-marker polls.
    pub poll_interval: Duration,
}

impl Default for OrchardOptions {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl OrchardOptions {
    /// Options rooted at `home_dir` with default timings.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    /// Resolve options from an explicit home (CLI flag), falling back to
    /// `ORCHARD_HOME` and then `~/.orchard`.
    pub fn resolve(home_override: Option<PathBuf>) -> OrchardResult<Self> {
        let options = match home_override {
            Some(home) => Self::with_home(absolutize(home)?),
            None => Self::default(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> OrchardResult<()> {
        if !self.home_dir.is_absolute() {
            return Err(OrchardError::Config(format!(
                "home_dir must be absolute path, got: {}",
                self.home_dir.display()
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(OrchardError::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

fn default_home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(envs::HOME).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".orchard"),
        None => std::env::temp_dir().join("orchard"),
    }
}

fn absolutize(path: PathBuf) -> OrchardResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    Ok(std::env::current_dir()?.join(path))
}
