use crate::error::{AutopaceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the aggregator does when a single clip cannot be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    /// Fail the whole card; no auto-advance is scheduled.
    #[default]
    Abort,
    /// Leave the clip out of the total and keep going.
    Skip,
}

impl std::fmt::Display for ProbeFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFailurePolicy::Abort => write!(f, "abort"),
            ProbeFailurePolicy::Skip => write!(f, "skip"),
        }
    }
}

impl std::str::FromStr for ProbeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(ProbeFailurePolicy::Abort),
            "skip" => Ok(ProbeFailurePolicy::Skip),
            _ => Err(format!(
                "Unknown probe failure policy: {}. Use 'abort' or 'skip'",
                s
            )),
        }
    }
}

pub fn default_mpv_socket() -> &'static str {
    #[cfg(windows)]
    return r"\\.\pipe\mpvsocket";
    #[cfg(not(windows))]
    return "/tmp/mpvsocket";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback speed applied when a profile opens and on reset.
    pub default_speed: f64,
    /// Speed step in percent for speed up / slow down.
    pub speed_factor: f64,
    pub speed_up_shortcut: String,
    pub slow_down_shortcut: String,
    pub reset_speed_shortcut: String,
    /// Binary used to measure clip durations.
    pub prober: String,
    pub on_probe_failure: ProbeFailurePolicy,
    pub auto_advance: bool,
    /// When set, auto-advance only acts while the player runs at this speed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_advance_speed: Option<f64>,
    /// Seconds to wait on cards whose answer has no audio.
    pub silent_card_delay: f64,
    /// Ease passed to the reviewer when a card is auto-graded (1..=4).
    pub answer_ease: u8,
    pub mpv_socket: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            speed_factor: 10.0,
            speed_up_shortcut: "Ctrl+]".to_string(),
            slow_down_shortcut: "Ctrl+[".to_string(),
            reset_speed_shortcut: "Ctrl+\\".to_string(),
            prober: "mpv".to_string(),
            on_probe_failure: ProbeFailurePolicy::default(),
            auto_advance: true,
            auto_advance_speed: None,
            silent_card_delay: 2.0,
            answer_ease: 3,
            mpv_socket: PathBuf::from(default_mpv_socket()),
        }
    }
}

impl Config {
    /// Defaults, then the user config file, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                config = Self::from_file(&config_path)?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(contents)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(speed) = std::env::var("AUTOPACE_DEFAULT_SPEED") {
            if let Ok(s) = speed.parse() {
                self.default_speed = s;
            }
        }
        if let Ok(factor) = std::env::var("AUTOPACE_SPEED_FACTOR") {
            if let Ok(f) = factor.parse() {
                self.speed_factor = f;
            }
        }
        if let Ok(prober) = std::env::var("AUTOPACE_PROBER") {
            if !prober.is_empty() {
                self.prober = prober;
            }
        }
        if let Ok(policy) = std::env::var("AUTOPACE_ON_PROBE_FAILURE") {
            if let Ok(p) = policy.parse() {
                self.on_probe_failure = p;
            }
        }
        if let Ok(socket) = std::env::var("AUTOPACE_MPV_SOCKET") {
            self.mpv_socket = PathBuf::from(socket);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_speed.is_finite() && self.default_speed > 0.0) {
            return Err(AutopaceError::Config(format!(
                "default_speed must be positive, got {}",
                self.default_speed
            )));
        }

        if !(self.speed_factor.is_finite() && self.speed_factor > 0.0) {
            return Err(AutopaceError::Config(
                "speed_factor must be greater than 0".to_string(),
            ));
        }

        if let Some(speed) = self.auto_advance_speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(AutopaceError::Config(format!(
                    "auto_advance_speed must be positive, got {}",
                    speed
                )));
            }
        }

        if !(self.silent_card_delay.is_finite() && self.silent_card_delay > 0.0) {
            return Err(AutopaceError::Config(
                "silent_card_delay must be greater than 0".to_string(),
            ));
        }

        if !(1..=4).contains(&self.answer_ease) {
            return Err(AutopaceError::Config(format!(
                "answer_ease must be between 1 and 4, got {}",
                self.answer_ease
            )));
        }

        if self.prober.trim().is_empty() {
            return Err(AutopaceError::Config("prober must not be empty".to_string()));
        }

        Ok(())
    }

    /// Speed step as a multiplier delta (10 percent becomes 0.1).
    pub fn speed_step(&self) -> f64 {
        self.speed_factor / 100.0
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autopace").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "abort".parse::<ProbeFailurePolicy>().unwrap(),
            ProbeFailurePolicy::Abort
        );
        assert_eq!(
            "SKIP".parse::<ProbeFailurePolicy>().unwrap(),
            ProbeFailurePolicy::Skip
        );
        assert!("retry".parse::<ProbeFailurePolicy>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_speed, 1.0);
        assert_eq!(config.speed_factor, 10.0);
        assert_eq!(config.prober, "mpv");
        assert_eq!(config.on_probe_failure, ProbeFailurePolicy::Abort);
        assert_eq!(config.silent_card_delay, 2.0);
        assert_eq!(config.answer_ease, 3);
        assert!(config.auto_advance_speed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_speed_step() {
        let config = Config {
            speed_factor: 25.0,
            ..Config::default()
        };
        assert!((config.speed_step() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
default_speed = 1.2
on_probe_failure = "skip"
speed_up_shortcut = "Ctrl+Up"
"#,
        )
        .unwrap();

        assert_eq!(config.default_speed, 1.2);
        assert_eq!(config.on_probe_failure, ProbeFailurePolicy::Skip);
        assert_eq!(config.speed_up_shortcut, "Ctrl+Up");
        assert_eq!(config.speed_factor, 10.0);
        assert_eq!(config.prober, "mpv");
    }

    #[test]
    fn test_bad_toml_is_error() {
        let result = Config::from_toml_str("default_speed = \"fast\"");
        assert!(matches!(result, Err(AutopaceError::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            default_speed: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            answer_ease: 5,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            prober: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            auto_advance_speed: Some(-1.0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "speed_factor = 5.0\nauto_advance = false\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.speed_factor, 5.0);
        assert!(!config.auto_advance);
    }
}
