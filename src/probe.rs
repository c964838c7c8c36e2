use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{AutopaceError, Result};

/// Marker mpv prints once playback starts, followed by the duration in seconds.
pub const DURATION_PREFIX: &str = "DURATION=";

/// Default prober binary.
pub const DEFAULT_PROBER: &str = "mpv";

/// Measures the duration of a single media file.
pub trait DurationProber: Send + Sync {
    /// Duration of the clip at `path` in seconds.
    fn probe(&self, path: &Path) -> Result<f64>;
    fn name(&self) -> &str;
}

/// Prober backed by mpv decoding a single frame with audio and video disabled.
#[derive(Debug, Clone)]
pub struct MpvProber {
    binary: String,
}

impl Default for MpvProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBER)
    }
}

impl MpvProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check that the prober binary is installed and runs.
    pub fn check(&self) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|e| {
                AutopaceError::ProberNotFound(format!(
                    "{} not found. Please install mpv and ensure it's in your PATH. Error: {e}",
                    self.binary
                ))
            })?;

        if !output.status.success() {
            return Err(AutopaceError::ProberNotFound(format!(
                "{} --version failed",
                self.binary
            )));
        }

        debug!("{} is available", self.binary);
        Ok(())
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--term-playing-msg=DURATION=${=duration}",
            "--no-config",
            "--no-cache",
            "--quiet",
            "--vo=null",
            "--ao=null",
            "--frames=1",
        ])
        .arg(path);
        cmd
    }
}

impl DurationProber for MpvProber {
    fn probe(&self, path: &Path) -> Result<f64> {
        if !path.exists() {
            return Err(AutopaceError::FileNotFound(path.display().to_string()));
        }

        let output = self.command(path).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AutopaceError::ProberNotFound(format!("{}: {e}", self.binary))
            } else {
                AutopaceError::Probe(format!("Failed to run {}: {e}", self.binary))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutopaceError::Probe(format!(
                "{} exited with {} for {}: {}",
                self.binary,
                output.status,
                path.display(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let duration = parse_duration_output(&stdout)?;
        debug!("Probed {}: {:.3}s", path.display(), duration);
        Ok(duration)
    }

    fn name(&self) -> &str {
        &self.binary
    }
}

/// Duration of `path` measured with the default mpv prober.
pub fn probe_duration(path: &Path) -> Result<f64> {
    MpvProber::default().probe(path)
}

/// Parse the first `DURATION=<seconds>` line of prober output.
pub fn parse_duration_output(stdout: &str) -> Result<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(DURATION_PREFIX))
        .ok_or_else(|| AutopaceError::Probe("No duration line in prober output".to_string()))?;

    let value = line[DURATION_PREFIX.len()..].trim();
    let seconds: f64 = value
        .parse()
        .map_err(|e| AutopaceError::Probe(format!("Failed to parse duration '{value}': {e}")))?;

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(AutopaceError::Probe(format!("Invalid duration '{value}'")));
    }

    Ok(seconds)
}
