use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate_answer_duration;
use crate::card::{Card, CardId, NoteType};
use crate::config::Config;
use crate::error::{AutopaceError, Result};
use crate::hooks::{HookEvent, HookKind, HookRegistry, SubscriptionId};
use crate::host::{Notifier, PlayerBackend, Reviewer};
use crate::probe::DurationProber;
use crate::scheduler::{schedule_auto_advance_on, ScheduleHandle};
use crate::speed::SpeedController;

pub const WARNING_TITLE: &str = "Audio Playback Controls";
pub const PLAYER_UNAVAILABLE_MESSAGE: &str = "This add-on only works with the mpv media player.";

/// Two speeds closer than this count as equal for the speed gate.
const SPEED_EPSILON: f64 = 1e-6;

/// Host services the session drives.
#[derive(Clone)]
pub struct HostServices {
    pub player: Arc<dyn PlayerBackend>,
    pub reviewer: Arc<dyn Reviewer>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Default)]
struct ActiveTimer {
    /// Bumped on every card display; work started for an older value is stale.
    generation: u64,
    pending: Option<ScheduleHandle>,
}

impl ActiveTimer {
    fn next_generation(&mut self) -> u64 {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
        self.generation += 1;
        self.generation
    }
}

/// Auto-reveals answers and auto-grades cards once their answer audio has
/// had time to play.
///
/// At most one auto-advance is pending at any time.
pub struct AutoAdvanceSession {
    config: Config,
    runtime: Handle,
    host: HostServices,
    speed: SpeedController,
    prober: Arc<dyn DurationProber>,
    media_dir: PathBuf,
    enabled: AtomicBool,
    warned: AtomicBool,
    active: Mutex<ActiveTimer>,
}

impl AutoAdvanceSession {
    pub fn new(
        config: Config,
        runtime: Handle,
        host: HostServices,
        prober: Arc<dyn DurationProber>,
        media_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let speed = SpeedController::new(&config, host.player.clone(), host.notifier.clone());
        Arc::new(Self {
            config,
            runtime,
            host,
            speed,
            prober,
            media_dir: media_dir.into(),
            enabled: AtomicBool::new(false),
            warned: AtomicBool::new(false),
            active: Mutex::new(ActiveTimer::default()),
        })
    }

    /// Subscribe the session to the reviewer hooks.
    pub fn install(self: &Arc<Self>, registry: &HookRegistry) -> Vec<SubscriptionId> {
        let session = Arc::downgrade(self);
        let profile = registry.register(HookKind::ProfileOpened, move |_| {
            if let Some(session) = session.upgrade() {
                if let Err(e) = session.on_profile_opened() {
                    warn!("Auto-advance disabled: {}", e);
                }
            }
        });

        let session = Arc::downgrade(self);
        let question = registry.register(HookKind::QuestionShown, move |event| {
            if let (Some(session), HookEvent::QuestionShown(card)) = (session.upgrade(), event) {
                session.on_question_shown(card);
            }
        });

        let session = Arc::downgrade(self);
        let answer = registry.register(HookKind::AnswerShown, move |event| {
            if let (Some(session), HookEvent::AnswerShown { card, note_type }) =
                (session.upgrade(), event)
            {
                session.on_answer_shown(card, note_type);
            }
        });

        vec![profile, question, answer]
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Speed controls sharing the session's player and notifier.
    pub fn speed_controller(&self) -> &SpeedController {
        &self.speed
    }

    /// Check the player and apply the default speed.
    ///
    /// Without a usable player the session disables itself; the user is
    /// warned the first time only.
    pub fn on_profile_opened(&self) -> Result<()> {
        match self.speed.apply_default_speed() {
            Ok(()) => {
                self.enabled.store(true, Ordering::Release);
                info!(
                    "Playback speed set to {}; auto-advance {}",
                    self.speed.default_speed(),
                    if self.config.auto_advance { "on" } else { "off" }
                );
                Ok(())
            }
            Err(e) => {
                self.enabled.store(false, Ordering::Release);
                if !self.warned.swap(true, Ordering::AcqRel) {
                    self.host
                        .notifier
                        .warning(WARNING_TITLE, PLAYER_UNAVAILABLE_MESSAGE);
                }
                Err(AutopaceError::SpeedUnavailable(e.to_string()))
            }
        }
    }

    /// Cancel any pending advance and reveal the answer of a new card.
    pub fn on_question_shown(&self, card: &Card) {
        self.lock_active().next_generation();

        if !self.is_active() {
            return;
        }
        if self.host.reviewer.last_card() == Some(card.id) {
            debug!("Card {} shown again right after answering; not revealing", card.id);
            return;
        }
        if !self.speed_gate() {
            return;
        }

        debug!("Revealing answer of card {}", card.id);
        self.host.reviewer.show_answer();
    }

    /// Measure the answer audio off the calling thread, then arm the
    /// auto-grade timer. Returns the measuring task.
    ///
    /// The answer template is picked from `note_type` by the card's ordinal.
    pub fn on_answer_shown(
        self: &Arc<Self>,
        card: &Card,
        note_type: &NoteType,
    ) -> Option<JoinHandle<()>> {
        let generation = self.lock_active().next_generation();

        if !self.is_active() {
            return None;
        }

        let template = match note_type.template_for(card) {
            Ok(template) => template.clone(),
            Err(e) => {
                warn!(
                    "Card {}: no auto-advance for note type '{}', {}",
                    card.id, note_type.name, e
                );
                return None;
            }
        };

        let session = self.clone();
        let card = card.clone();

        Some(self.runtime.spawn(async move {
            let card_id = card.id;
            let prober = session.prober.clone();
            let media_dir = session.media_dir.clone();
            let policy = session.config.on_probe_failure;

            let measured = tokio::task::spawn_blocking(move || {
                aggregate_answer_duration(&card, &template, &media_dir, prober.as_ref(), policy)
            })
            .await;

            match measured {
                Ok(Ok(report)) => session.arm(generation, card_id, report.total_seconds),
                Ok(Err(e)) => warn!("Card {}: no auto-advance, {}", card_id, e),
                Err(e) => warn!("Card {}: duration task failed: {}", card_id, e),
            }
        }))
    }

    /// Cancel whatever is pending.
    pub fn shutdown(&self) {
        self.lock_active().next_generation();
    }

    /// Delay of the pending auto-advance, if one is armed.
    pub fn pending_delay(&self) -> Option<Duration> {
        self.lock_active()
            .pending
            .as_ref()
            .filter(|h| h.is_pending())
            .map(ScheduleHandle::delay)
    }

    fn arm(self: &Arc<Self>, generation: u64, card_id: CardId, seconds: f64) {
        let speed = match self.host.player.speed() {
            Ok(speed) => speed,
            Err(e) => {
                warn!("Card {}: cannot read playback speed: {}", card_id, e);
                return;
            }
        };

        let mut active = self.lock_active();
        if active.generation != generation {
            debug!("Card {}: display changed while measuring; dropping", card_id);
            return;
        }

        let session: Weak<Self> = Arc::downgrade(self);
        let scheduled = schedule_auto_advance_on(
            &self.runtime,
            seconds,
            speed,
            self.config.silent_card_delay,
            move || {
                if let Some(session) = session.upgrade() {
                    session.fire(generation, card_id);
                }
            },
        );

        match scheduled {
            Ok(handle) => {
                info!(
                    "Card {}: auto-advance in {:.2}s ({:.2}s audio at {}x)",
                    card_id,
                    handle.delay().as_secs_f64(),
                    seconds,
                    speed
                );
                active.pending = Some(handle);
            }
            Err(e) => warn!("Card {}: cannot schedule auto-advance: {}", card_id, e),
        }
    }

    fn fire(&self, generation: u64, card_id: CardId) {
        {
            let mut active = self.lock_active();
            if active.generation != generation {
                debug!("Card {}: stale auto-advance ignored", card_id);
                return;
            }
            active.pending = None;
        }

        if self.host.reviewer.current_card() != Some(card_id) {
            debug!("Card {} is no longer displayed; ignoring auto-advance", card_id);
            return;
        }
        if !self.speed_gate() {
            debug!("Card {}: speed gate closed; not grading", card_id);
            return;
        }

        info!("Card {}: auto-grading with ease {}", card_id, self.config.answer_ease);
        self.host.reviewer.answer_card(self.config.answer_ease);
    }

    fn is_active(&self) -> bool {
        self.config.auto_advance && self.is_enabled()
    }

    fn speed_gate(&self) -> bool {
        let Some(target) = self.config.auto_advance_speed else {
            return true;
        };
        match self.host.player.speed() {
            Ok(speed) => (speed - target).abs() < SPEED_EPSILON,
            Err(e) => {
                warn!("Cannot read playback speed: {}", e);
                false
            }
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveTimer> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AutoAdvanceSession {
    fn drop(&mut self) {
        if let Ok(active) = self.active.get_mut() {
            if let Some(handle) = active.pending.take() {
                handle.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::CardTemplate;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::mpsc;

    struct FixedProber(HashMap<String, f64>);

    impl DurationProber for FixedProber {
        fn probe(&self, path: &Path) -> Result<f64> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            self.0
                .get(&name)
                .copied()
                .ok_or_else(|| AutopaceError::Probe(format!("cannot decode {name}")))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Reports it was called, then blocks until released.
    struct GateProber {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DurationProber for GateProber {
        fn probe(&self, _path: &Path) -> Result<f64> {
            let _ = self.entered.lock().unwrap().send(());
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(10))
                .map_err(|e| AutopaceError::Probe(e.to_string()))?;
            Ok(4.0)
        }

        fn name(&self) -> &str {
            "gate"
        }
    }

    struct FakePlayer {
        speed: Mutex<Option<f64>>,
    }

    impl PlayerBackend for FakePlayer {
        fn speed(&self) -> Result<f64> {
            self.speed
                .lock()
                .unwrap()
                .ok_or_else(|| AutopaceError::SpeedUnavailable("no player".to_string()))
        }

        fn set_speed(&self, speed: f64) -> Result<()> {
            let mut current = self.speed.lock().unwrap();
            match *current {
                Some(_) => {
                    *current = Some(speed);
                    Ok(())
                }
                None => Err(AutopaceError::SpeedUnavailable("no player".to_string())),
            }
        }

        fn add_speed(&self, delta: f64) -> Result<()> {
            let current = self.speed()?;
            self.set_speed(current + delta)
        }
    }

    #[derive(Default)]
    struct FakeReviewer {
        current: Mutex<Option<CardId>>,
        last: Mutex<Option<CardId>>,
        reveals: Mutex<usize>,
        answers: Mutex<Vec<(CardId, u8)>>,
    }

    impl FakeReviewer {
        fn display(&self, id: CardId) {
            *self.current.lock().unwrap() = Some(id);
        }
    }

    impl Reviewer for FakeReviewer {
        fn current_card(&self) -> Option<CardId> {
            *self.current.lock().unwrap()
        }

        fn last_card(&self) -> Option<CardId> {
            *self.last.lock().unwrap()
        }

        fn show_answer(&self) {
            *self.reveals.lock().unwrap() += 1;
        }

        fn answer_card(&self, ease: u8) {
            let id = self.current_card().unwrap();
            self.answers.lock().unwrap().push((id, ease));
            *self.last.lock().unwrap() = Some(id);
        }
    }

    #[derive(Default)]
    struct Warnings(Mutex<Vec<String>>);

    impl Notifier for Warnings {
        fn tooltip(&self, _message: &str) {}

        fn warning(&self, _title: &str, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    struct Fixture {
        session: Arc<AutoAdvanceSession>,
        player: Arc<FakePlayer>,
        reviewer: Arc<FakeReviewer>,
        warnings: Arc<Warnings>,
    }

    fn fixture(config: Config, speed: Option<f64>) -> Fixture {
        let prober = Arc::new(FixedProber(HashMap::from([
            ("clip.mp3".to_string(), 3.5),
            ("long.mp3".to_string(), 6.0),
        ])));
        fixture_with(config, speed, prober)
    }

    fn fixture_with(
        config: Config,
        speed: Option<f64>,
        prober: Arc<dyn DurationProber>,
    ) -> Fixture {
        let player = Arc::new(FakePlayer {
            speed: Mutex::new(speed),
        });
        let reviewer = Arc::new(FakeReviewer::default());
        let warnings = Arc::new(Warnings::default());

        let session = AutoAdvanceSession::new(
            config,
            Handle::current(),
            HostServices {
                player: player.clone(),
                reviewer: reviewer.clone(),
                notifier: warnings.clone(),
            },
            prober,
            "/media",
        );

        Fixture {
            session,
            player,
            reviewer,
            warnings,
        }
    }

    fn back_template() -> CardTemplate {
        CardTemplate {
            name: "Card 1".to_string(),
            question_format: "{{Front}}".to_string(),
            answer_format: "{{FrontSide}}<hr id=answer>{{Back}}".to_string(),
        }
    }

    fn note_type() -> NoteType {
        NoteType {
            name: "Basic".to_string(),
            templates: vec![back_template()],
        }
    }

    fn card(id: u64, back: &str) -> Card {
        Card::new(CardId(id), 0)
            .with_field("Front", "word")
            .with_field("Back", back)
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_open_applies_default_speed() {
        let config = Config {
            default_speed: 1.2,
            ..Config::default()
        };
        let f = fixture(config, Some(1.0));

        f.session.on_profile_opened().unwrap();
        assert!(f.session.is_enabled());
        assert_eq!(f.player.speed().unwrap(), 1.2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_player_warns_once() {
        let f = fixture(Config::default(), None);

        assert!(matches!(
            f.session.on_profile_opened(),
            Err(AutopaceError::SpeedUnavailable(_))
        ));
        assert!(f.session.on_profile_opened().is_err());
        assert!(!f.session.is_enabled());
        assert_eq!(*f.warnings.0.lock().unwrap(), vec![PLAYER_UNAVAILABLE_MESSAGE]);

        f.reviewer.display(CardId(1));
        assert!(f.session.on_answer_shown(&card(1, "[sound:clip.mp3]"), &note_type()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_audio_schedules_grade() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        f.session
            .on_answer_shown(&card(1, "[sound:clip.mp3]"), &note_type())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(f.session.pending_delay(), Some(Duration::from_secs_f64(3.5)));

        tokio::time::sleep(Duration::from_millis(3400)).await;
        assert!(f.reviewer.answers.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*f.reviewer.answers.lock().unwrap(), vec![(CardId(1), 3)]);
        assert_eq!(f.session.pending_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fire_is_ignored() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        f.session
            .on_answer_shown(&card(1, "[sound:clip.mp3]"), &note_type())
            .unwrap()
            .await
            .unwrap();

        // The host moved on without telling the session.
        f.reviewer.display(CardId(2));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(f.reviewer.answers.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_card_cancels_previous_timer() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        f.session
            .on_answer_shown(&card(1, "[sound:long.mp3]"), &note_type())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(f.session.pending_delay(), Some(Duration::from_secs(6)));

        f.reviewer.display(CardId(2));
        f.session.on_question_shown(&card(2, "[sound:clip.mp3]"));
        assert_eq!(f.session.pending_delay(), None);
        assert_eq!(*f.reviewer.reveals.lock().unwrap(), 1);

        f.session
            .on_answer_shown(&card(2, "[sound:clip.mp3]"), &note_type())
            .unwrap()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*f.reviewer.answers.lock().unwrap(), vec![(CardId(2), 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_card_waits_floor_scaled_by_speed() {
        let f = fixture(Config::default(), Some(2.0));
        f.session.on_profile_opened().unwrap();
        // Profile open resets to the default speed; speed up afterwards.
        f.player.set_speed(2.0).unwrap();
        f.reviewer.display(CardId(5));

        f.session
            .on_answer_shown(&card(5, "no audio"), &note_type())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(f.session.pending_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_arms_nothing() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        f.session
            .on_answer_shown(&card(1, "[sound:missing.mp3]"), &note_type())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(f.session.pending_delay(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_template_ordinal_arms_nothing() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        let mut reversed = card(1, "[sound:clip.mp3]");
        reversed.ord = 1;
        assert!(f.session.on_answer_shown(&reversed, &note_type()).is_none());
        assert_eq!(f.session.pending_delay(), None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(f.reviewer.answers.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_chosen_by_ordinal() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        let mut note_type = note_type();
        note_type.templates.push(CardTemplate {
            name: "Card 2".to_string(),
            question_format: "{{Back}}".to_string(),
            answer_format: "{{Extra}}".to_string(),
        });
        let mut reversed = card(1, "[sound:clip.mp3]").with_field("Extra", "[sound:long.mp3]");
        reversed.ord = 1;

        f.session
            .on_answer_shown(&reversed, &note_type)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(f.session.pending_delay(), Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_during_measurement_drops_result() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let prober = Arc::new(GateProber {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let f = fixture_with(Config::default(), Some(1.0), prober);
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        let measuring = f
            .session
            .on_answer_shown(&card(1, "[sound:clip.mp3]"), &note_type())
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        // The next card arrives while the clip is still being measured.
        f.session.on_question_shown(&card(2, ""));
        release_tx.send(()).unwrap();
        measuring.await.unwrap();

        assert_eq!(f.session.pending_delay(), None);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(f.reviewer.answers.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_gate() {
        let config = Config {
            auto_advance_speed: Some(1.2),
            ..Config::default()
        };
        let f = fixture(config, Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        f.session.on_question_shown(&card(1, "[sound:clip.mp3]"));
        assert_eq!(*f.reviewer.reveals.lock().unwrap(), 0);

        f.player.set_speed(1.2).unwrap();
        f.session.on_question_shown(&card(1, "[sound:clip.mp3]"));
        assert_eq!(*f.reviewer.reveals.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_card_again_is_not_revealed() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        *f.reviewer.last.lock().unwrap() = Some(CardId(1));

        f.session.on_question_shown(&card(1, ""));
        assert_eq!(*f.reviewer.reveals.lock().unwrap(), 0);

        f.session.on_question_shown(&card(2, ""));
        assert_eq!(*f.reviewer.reveals.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_drive_session() {
        let f = fixture(Config::default(), Some(1.0));
        let registry = HookRegistry::new();
        let ids = f.session.install(&registry);
        assert_eq!(ids.len(), 3);

        registry.emit(&HookEvent::ProfileOpened);
        assert!(f.session.is_enabled());

        f.reviewer.display(CardId(3));
        registry.emit(&HookEvent::QuestionShown(card(3, "[sound:clip.mp3]")));
        assert_eq!(*f.reviewer.reveals.lock().unwrap(), 1);

        registry.emit(&HookEvent::AnswerShown {
            card: card(3, "[sound:clip.mp3]"),
            note_type: note_type(),
        });
        for _ in 0..1000 {
            if f.session.pending_delay().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(f.session.pending_delay(), Some(Duration::from_secs_f64(3.5)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*f.reviewer.answers.lock().unwrap(), vec![(CardId(3), 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending() {
        let f = fixture(Config::default(), Some(1.0));
        f.session.on_profile_opened().unwrap();
        f.reviewer.display(CardId(1));

        f.session
            .on_answer_shown(&card(1, "[sound:clip.mp3]"), &note_type())
            .unwrap()
            .await
            .unwrap();
        f.session.shutdown();
        f.session.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(f.reviewer.answers.lock().unwrap().is_empty());
    }
}
