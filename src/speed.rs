use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::host::{Notifier, PlayerBackend, WebBridge};

/// Lowest speed the controls will step down to.
pub const MIN_SPEED: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedAction {
    SpeedUp,
    SlowDown,
    Reset,
}

impl SpeedAction {
    pub fn label(&self) -> &'static str {
        match self {
            SpeedAction::SpeedUp => "Speed Up Audio",
            SpeedAction::SlowDown => "Slow Down Audio",
            SpeedAction::Reset => "Reset Audio Speed",
        }
    }
}

/// A reviewer action the host binds to a menu entry and shortcut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBinding {
    pub label: &'static str,
    pub shortcut: String,
    pub action: SpeedAction,
}

/// Speed up / slow down / reset, mirrored to the web view so HTML5 audio
/// follows the player.
pub struct SpeedController {
    player: Arc<dyn PlayerBackend>,
    bridge: Option<Arc<dyn WebBridge>>,
    notifier: Arc<dyn Notifier>,
    default_speed: f64,
    step: f64,
}

impl SpeedController {
    pub fn new(
        config: &Config,
        player: Arc<dyn PlayerBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            player,
            bridge: None,
            notifier,
            default_speed: config.default_speed,
            step: config.speed_step(),
        }
    }

    /// Send speed changes to the reviewer web view as well.
    pub fn with_bridge(mut self, bridge: Arc<dyn WebBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn actions(config: &Config) -> Vec<ActionBinding> {
        vec![
            ActionBinding {
                label: SpeedAction::SpeedUp.label(),
                shortcut: config.speed_up_shortcut.clone(),
                action: SpeedAction::SpeedUp,
            },
            ActionBinding {
                label: SpeedAction::SlowDown.label(),
                shortcut: config.slow_down_shortcut.clone(),
                action: SpeedAction::SlowDown,
            },
            ActionBinding {
                label: SpeedAction::Reset.label(),
                shortcut: config.reset_speed_shortcut.clone(),
                action: SpeedAction::Reset,
            },
        ]
    }

    pub fn run(&self, action: SpeedAction) -> Result<f64> {
        match action {
            SpeedAction::SpeedUp => self.speed_up(),
            SpeedAction::SlowDown => self.slow_down(),
            SpeedAction::Reset => self.reset_speed(),
        }
    }

    pub fn speed_up(&self) -> Result<f64> {
        self.add_speed(self.step)
    }

    pub fn slow_down(&self) -> Result<f64> {
        self.add_speed(-self.step)
    }

    pub fn reset_speed(&self) -> Result<f64> {
        self.player.set_speed(self.default_speed)?;
        let speed = self.player.speed()?;
        self.notifier.tooltip(&format!("Reset Speed: {}", speed));
        self.eval("resetAudioSpeeed();");
        info!("Audio speed reset to {}", speed);
        Ok(speed)
    }

    /// Check the player answers, then apply the configured default speed
    /// without notifying anyone.
    pub fn apply_default_speed(&self) -> Result<()> {
        self.player.speed()?;
        self.player.set_speed(self.default_speed)?;
        debug!("Audio speed set to default {}", self.default_speed);
        Ok(())
    }

    pub fn default_speed(&self) -> f64 {
        self.default_speed
    }

    fn add_speed(&self, delta: f64) -> Result<f64> {
        let current = self.player.speed()?;
        // mpv refuses speeds at or below zero; stop at MIN_SPEED instead.
        let delta = if current + delta < MIN_SPEED {
            MIN_SPEED - current
        } else {
            delta
        };
        let delta = round_step(delta);

        if delta != 0.0 {
            self.player.add_speed(delta)?;
        }
        let speed = self.player.speed()?;

        self.notifier.tooltip(&format!(
            "Audio Speed {}<br>Current Speed: {}",
            signed(delta),
            speed
        ));
        self.eval(&format!("addAudioPlaybackRate({});", delta));
        debug!("Audio speed {} -> {}", current, speed);
        Ok(speed)
    }

    fn eval(&self, script: &str) {
        if let Some(bridge) = &self.bridge {
            bridge.eval(script);
        }
    }
}

fn round_step(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

fn signed(value: f64) -> String {
    if value >= 0.0 {
        format!("+{}", value)
    } else {
        format!("{}", value)
    }
}
