//! Services the host review application provides.
//!
//! Implementations are expected to marshal calls onto the host's UI thread
//! where the host requires it; the engine calls them from worker tasks.

use crate::card::CardId;
use crate::error::Result;

/// Playback speed control of the active media player.
pub trait PlayerBackend: Send + Sync {
    fn speed(&self) -> Result<f64>;
    fn set_speed(&self, speed: f64) -> Result<()>;
    fn add_speed(&self, delta: f64) -> Result<()>;
}

/// Script bridge into the reviewer's web view.
pub trait WebBridge: Send + Sync {
    fn eval(&self, script: &str);
}

/// Short-lived on-screen messages.
pub trait Notifier: Send + Sync {
    fn tooltip(&self, message: &str);
    fn warning(&self, title: &str, message: &str);
}

/// The reviewer's card state and transitions.
pub trait Reviewer: Send + Sync {
    /// Card currently displayed, if any.
    fn current_card(&self) -> Option<CardId>;
    /// Card most recently graded, if any.
    fn last_card(&self) -> Option<CardId>;
    fn show_answer(&self);
    /// Grade the current card with `ease` (1 = again ... 4 = easy).
    fn answer_card(&self, ease: u8);
}
