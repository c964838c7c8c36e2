//! One-shot, cancelable deferred callbacks on the tokio runtime.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{AutopaceError, Result};

/// Wait used for cards whose answer has no audio.
pub const SILENT_CARD_DELAY: f64 = 2.0;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Pending,
    Fired,
    Canceled,
}

impl ScheduleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            PENDING => ScheduleState::Pending,
            FIRED => ScheduleState::Fired,
            _ => ScheduleState::Canceled,
        }
    }
}

/// Delay before auto-advancing: `duration / speed`, with `floor` standing in
/// for a zero duration.
pub fn auto_advance_delay(duration_seconds: f64, speed: f64, floor: f64) -> Result<Duration> {
    if !(speed.is_finite() && speed > 0.0) {
        return Err(AutopaceError::InvalidTiming(format!(
            "speed must be positive, got {speed}"
        )));
    }
    if !(duration_seconds.is_finite() && duration_seconds >= 0.0) {
        return Err(AutopaceError::InvalidTiming(format!(
            "duration must be non-negative, got {duration_seconds}"
        )));
    }

    let effective = if duration_seconds == 0.0 {
        floor
    } else {
        duration_seconds
    };

    Duration::try_from_secs_f64(effective / speed)
        .map_err(|e| AutopaceError::InvalidTiming(format!("delay out of range: {e}")))
}

/// Handle to a scheduled callback.
///
/// Dropping the handle does not cancel the callback.
#[derive(Debug)]
pub struct ScheduleHandle {
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
    delay: Duration,
}

impl ScheduleHandle {
    /// Cancel the callback if it has not fired yet.
    ///
    /// Returns `true` only for the call that moved the handle from pending to
    /// canceled; later calls and calls after firing do nothing.
    pub fn cancel(&self) -> bool {
        let canceled = self
            .state
            .compare_exchange(PENDING, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if canceled {
            self.task.abort();
            debug!("Canceled deferred task ({:?})", self.delay);
        }
        canceled
    }

    pub fn state(&self) -> ScheduleState {
        ScheduleState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.state() == ScheduleState::Pending
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Run `on_fire` once after `delay` on `runtime`.
pub fn schedule_after<F>(runtime: &Handle, delay: Duration, on_fire: F) -> ScheduleHandle
where
    F: FnOnce() + Send + 'static,
{
    let state = Arc::new(AtomicU8::new(PENDING));
    let task_state = state.clone();

    let task = runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if task_state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            on_fire();
        }
    });

    ScheduleHandle { state, task, delay }
}

/// Schedule an auto-advance on `runtime` after the speed-scaled duration.
pub fn schedule_auto_advance_on<F>(
    runtime: &Handle,
    duration_seconds: f64,
    speed: f64,
    floor: f64,
    on_fire: F,
) -> Result<ScheduleHandle>
where
    F: FnOnce() + Send + 'static,
{
    let delay = auto_advance_delay(duration_seconds, speed, floor)?;
    debug!(
        "Auto-advance in {:.3}s ({:.3}s audio at {}x)",
        delay.as_secs_f64(),
        duration_seconds,
        speed
    );
    Ok(schedule_after(runtime, delay, on_fire))
}

/// Schedule an auto-advance on the current tokio runtime with the default
/// silent-card floor.
pub fn schedule_auto_advance<F>(
    duration_seconds: f64,
    speed: f64,
    on_fire: F,
) -> Result<ScheduleHandle>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = Handle::try_current().map_err(|e| AutopaceError::NoRuntime(e.to_string()))?;
    schedule_auto_advance_on(&runtime, duration_seconds, speed, SILENT_CARD_DELAY, on_fire)
}
