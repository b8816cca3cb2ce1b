use crate::application::sync_dispatcher::SyncTriggerSink;
use crate::domain::error::TimerError;
use crate::domain::interval::{CompletedPhase, IntervalScheduler, PhaseTransition};
use crate::domain::models::{
    PomodoroMode, PomodoroPhase, PomodoroSettings, Session, SyncTrigger, TimerState, TimerStatus,
};
use crate::domain::stopwatch::StopwatchTimer;
use crate::infrastructure::scheduler::{system_clock, NowProvider, Scheduler, TimerHandle};
use crate::infrastructure::snapshot_repository::SnapshotRepository;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Called once per focus or break phase that runs out.
pub type PhaseListener = Arc<dyn Fn(PhaseTransition) + Send + Sync>;

#[derive(Debug)]
struct TimerCore {
    stopwatch: StopwatchTimer,
    pomodoro: IntervalScheduler,
}

impl Default for TimerCore {
    fn default() -> Self {
        Self {
            stopwatch: StopwatchTimer::new(),
            pomodoro: IntervalScheduler::new(PomodoroSettings::default()),
        }
    }
}

/// Stopwatch plus focus/break cycle for one tracked item.
///
/// Ticks run on the scheduler while the stopwatch is running. Finished
/// sessions and completed pomodoro phases are appended to the item and
/// reported to the sync sink.
pub struct TimerController {
    item_id: String,
    core: Mutex<TimerCore>,
    snapshots: Arc<SnapshotRepository>,
    sink: Arc<dyn SyncTriggerSink>,
    scheduler: Scheduler,
    now_provider: NowProvider,
    tick_interval: Duration,
    ticker: Mutex<Option<TimerHandle>>,
    phase_listener: Mutex<Option<PhaseListener>>,
}

impl TimerController {
    pub fn new(
        item_id: impl Into<String>,
        snapshots: Arc<SnapshotRepository>,
        sink: Arc<dyn SyncTriggerSink>,
        scheduler: Scheduler,
        tick_interval: Duration,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            core: Mutex::new(TimerCore::default()),
            snapshots,
            sink,
            scheduler,
            now_provider: system_clock(),
            tick_interval,
            ticker: Mutex::new(None),
            phase_listener: Mutex::new(None),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_phase_listener(self, listener: PhaseListener) -> Self {
        self.set_phase_listener(listener);
        self
    }

    /// Replaces the listener; it runs outside the controller's locks.
    pub fn set_phase_listener(&self, listener: PhaseListener) {
        *lock(&self.phase_listener) = Some(listener);
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn start(self: &Arc<Self>) -> Result<TimerState, TimerError> {
        let now = (self.now_provider)();
        let settings = self.item_settings();
        let state = {
            let mut core = self.lock_core();
            core.stopwatch.start(now)?;
            core.pomodoro.update_settings(settings);
            if settings.pomodoro_enabled {
                core.pomodoro.toggle_on(now)?;
            }
            core.stopwatch.state()
        };
        self.start_ticking();
        tracing::info!(
            "Started timer item_id={} pomodoro={}",
            self.item_id,
            settings.pomodoro_enabled
        );
        Ok(state)
    }

    pub fn pause(&self) -> Result<TimerState, TimerError> {
        let now = (self.now_provider)();
        let (state, transitions) = {
            let mut core = self.lock_core();
            core.stopwatch.pause(now)?;
            let transitions = core.pomodoro.suspend(now);
            (core.stopwatch.state(), transitions)
        };
        self.stop_ticking();
        self.record_transitions(transitions);
        tracing::info!("Paused timer item_id={} elapsed_ms={}", self.item_id, state.elapsed_ms);
        Ok(state)
    }

    pub fn resume(self: &Arc<Self>) -> Result<TimerState, TimerError> {
        let now = (self.now_provider)();
        let state = {
            let mut core = self.lock_core();
            core.stopwatch.resume(now)?;
            core.pomodoro.resume(now);
            core.stopwatch.state()
        };
        self.start_ticking();
        tracing::info!("Resumed timer item_id={}", self.item_id);
        Ok(state)
    }

    /// Finalizes the running session, appends it to the item and returns it.
    /// `None` when no session was active.
    pub fn stop(&self) -> Option<Session> {
        let now = (self.now_provider)();
        let (session, transitions) = {
            let mut core = self.lock_core();
            let transitions = core.pomodoro.tick(now);
            core.pomodoro.toggle_off();
            (core.stopwatch.stop(now), transitions)
        };
        self.stop_ticking();
        self.record_transitions(transitions);

        let session = session?;
        tracing::info!(
            "Stopped timer item_id={} duration_ms={}",
            self.item_id,
            session.duration_ms
        );
        self.append_session(session.clone());
        self.sink.notify(SyncTrigger::Session);
        Some(session)
    }

    /// Turns the focus/break cycle on or off. Requires an active session.
    pub fn toggle_pomodoro(&self) -> Result<PomodoroPhase, TimerError> {
        let now = (self.now_provider)();
        let settings = self.item_settings();
        let mut core = self.lock_core();
        let status = core.stopwatch.status();
        if status == TimerStatus::Idle {
            return Err(TimerError::NotRunning);
        }
        core.pomodoro.update_settings(settings);
        let mode = core.pomodoro.toggle(now)?;
        if mode == PomodoroMode::On && status == TimerStatus::Paused {
            core.pomodoro.suspend(now);
        }
        tracing::info!("Toggled pomodoro item_id={} mode={:?}", self.item_id, mode);
        Ok(core.pomodoro.phase())
    }

    /// Stores new settings on the item. A running phase keeps its length;
    /// the next phase uses the new one. Disabling turns the cycle off.
    pub fn update_settings(&self, settings: PomodoroSettings) -> PomodoroPhase {
        if let Err(message) = settings.validate() {
            tracing::warn!("Storing pomodoro settings with clamped lengths: {}", message);
        }
        let stored = self.snapshots.update(|snapshot| {
            let Some(item) = snapshot.item_mut(&self.item_id) else {
                return false;
            };
            item.pomodoro = settings;
            true
        });
        match stored {
            Ok(true) => self.sink.notify(SyncTrigger::Project),
            Ok(false) => tracing::warn!("Pomodoro settings for unknown item_id={}", self.item_id),
            Err(error) => tracing::error!("Failed to store pomodoro settings: {}", error),
        }

        let mut core = self.lock_core();
        core.pomodoro.update_settings(settings);
        core.pomodoro.phase()
    }

    pub fn state(&self) -> TimerState {
        self.lock_core().stopwatch.state()
    }

    pub fn pomodoro(&self) -> PomodoroPhase {
        self.lock_core().pomodoro.phase()
    }

    /// Cancels the tick task. The session, if any, stays open.
    pub fn shutdown(&self) {
        self.stop_ticking();
    }

    fn tick(&self) {
        let now = (self.now_provider)();
        let transitions = {
            let mut core = self.lock_core();
            core.stopwatch.tick(now);
            core.pomodoro.tick(now)
        };
        self.record_transitions(transitions);
    }

    // Checked under the ticker lock so a concurrent stop or pause cannot
    // leave a tick task behind.
    fn start_ticking(self: &Arc<Self>) {
        let mut ticker = lock(&self.ticker);
        if self.lock_core().stopwatch.status() != TimerStatus::Running {
            return;
        }
        let this = Arc::downgrade(self);
        let handle = self.scheduler.schedule_every(self.tick_interval, move || {
            if let Some(controller) = this.upgrade() {
                controller.tick();
            }
        });
        *ticker = Some(handle);
    }

    fn stop_ticking(&self) {
        lock(&self.ticker).take();
    }

    fn record_transitions(&self, transitions: Vec<PhaseTransition>) {
        if transitions.is_empty() {
            return;
        }
        let listener = lock(&self.phase_listener).clone();
        for transition in transitions {
            tracing::info!(
                "Pomodoro phase complete item_id={} phase={:?}",
                self.item_id,
                transition.completed
            );
            self.append_session(phase_session(&transition));
            self.sink.notify(SyncTrigger::Pomodoro);
            if let Some(listener) = &listener {
                listener(transition);
            }
        }
    }

    fn append_session(&self, session: Session) {
        match self.snapshots.append_session(&self.item_id, session) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Dropping session for unknown item_id={}", self.item_id),
            Err(error) => tracing::error!("Failed to store session: {}", error),
        }
    }

    fn item_settings(&self) -> PomodoroSettings {
        match self.snapshots.current() {
            Ok(snapshot) => snapshot
                .item(&self.item_id)
                .map(|item| item.pomodoro)
                .unwrap_or_default(),
            Err(error) => {
                tracing::warn!("Using default pomodoro settings: {}", error);
                PomodoroSettings::default()
            }
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, TimerCore> {
        lock(&self.core)
    }
}

fn phase_session(transition: &PhaseTransition) -> Session {
    let length = ChronoDuration::milliseconds(i64::try_from(transition.duration_ms).unwrap_or(i64::MAX));
    let start_time: DateTime<Utc> = transition.completed_at - length;
    let mut session = Session::begin(start_time);
    session.end_time = Some(transition.completed_at);
    session.duration_ms = transition.duration_ms;
    session.is_pomodoro_session = true;
    session.is_break = transition.completed == CompletedPhase::Break;
    session
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TrackedItem;
    use crate::infrastructure::local_store::InMemoryLocalStore;
    use crate::infrastructure::scheduler::monotonic_clock;

    #[derive(Default)]
    struct RecordingSink {
        triggers: Mutex<Vec<SyncTrigger>>,
    }

    impl RecordingSink {
        fn triggers(&self) -> Vec<SyncTrigger> {
            self.triggers.lock().expect("sink lock poisoned").clone()
        }
    }

    impl SyncTriggerSink for RecordingSink {
        fn notify(&self, trigger: SyncTrigger) {
            self.triggers.lock().expect("sink lock poisoned").push(trigger);
        }
    }

    struct Harness {
        controller: Arc<TimerController>,
        snapshots: Arc<SnapshotRepository>,
        sink: Arc<RecordingSink>,
    }

    fn harness(pomodoro: PomodoroSettings) -> Harness {
        let snapshots = Arc::new(SnapshotRepository::load(Arc::new(InMemoryLocalStore::default())));
        snapshots
            .update(|snapshot| {
                let mut item = TrackedItem::new("item-1", "Guitar");
                item.pomodoro = pomodoro;
                snapshot.items.push(item);
            })
            .expect("seed item");
        let sink = Arc::new(RecordingSink::default());
        let controller = TimerController::new(
            "item-1",
            Arc::clone(&snapshots),
            sink.clone(),
            Scheduler::current().expect("scheduler"),
            Duration::from_secs(1),
        )
        .with_now_provider(monotonic_clock());
        Harness {
            controller: Arc::new(controller),
            snapshots,
            sink,
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_records_session_and_notifies() {
        let harness = harness(PomodoroSettings::default());
        harness.controller.start().expect("start");
        advance(120_000).await;
        harness.controller.pause().expect("pause");
        advance(30_000).await;
        harness.controller.resume().expect("resume");
        advance(75_000).await;

        let session = harness.controller.stop().expect("session");
        assert_eq!(session.duration_ms, 195_000);
        assert_eq!(harness.controller.state().status, TimerStatus::Idle);
        assert_eq!(harness.sink.triggers(), vec![SyncTrigger::Session]);

        let snapshot = harness.snapshots.current().expect("snapshot");
        let item = snapshot.item("item-1").expect("item");
        assert_eq!(item.total_time_ms, 195_000);
        assert_eq!(item.sessions, vec![session]);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_advance_elapsed_while_running() {
        let harness = harness(PomodoroSettings::default());
        harness.controller.start().expect("start");
        advance(3_500).await;
        assert_eq!(harness.controller.state().elapsed_ms, 3_000);

        harness.controller.pause().expect("pause");
        advance(10_000).await;
        assert_eq!(harness.controller.state().elapsed_ms, 3_500);
        assert_eq!(harness.controller.state().status, TimerStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn misuse_is_reported() {
        let harness = harness(PomodoroSettings::default());
        assert_eq!(harness.controller.pause(), Err(TimerError::NotRunning));
        assert_eq!(harness.controller.resume(), Err(TimerError::NotPaused));
        assert_eq!(harness.controller.toggle_pomodoro(), Err(TimerError::NotRunning));
        assert!(harness.controller.stop().is_none());

        harness.controller.start().expect("start");
        assert_eq!(harness.controller.start(), Err(TimerError::AlreadyRunning));
        assert_eq!(harness.controller.resume(), Err(TimerError::NotPaused));
        assert_eq!(
            harness.controller.toggle_pomodoro(),
            Err(TimerError::PomodoroDisabled)
        );
        assert!(harness.sink.triggers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn focus_completion_flips_to_break_and_records_session() {
        let harness = harness(PomodoroSettings::enabled(25, 5));
        harness.controller.start().expect("start");
        assert_eq!(harness.controller.pomodoro().time_left_ms, 1_500_000);

        advance(1_500_500).await;
        let phase = harness.controller.pomodoro();
        assert!(phase.is_break);
        assert_eq!(phase.time_left_ms, 300_000);
        assert_eq!(harness.sink.triggers(), vec![SyncTrigger::Pomodoro]);

        advance(300_000).await;
        assert!(!harness.controller.pomodoro().is_break);
        assert_eq!(
            harness.sink.triggers(),
            vec![SyncTrigger::Pomodoro, SyncTrigger::Pomodoro]
        );

        let snapshot = harness.snapshots.current().expect("snapshot");
        let item = snapshot.item("item-1").expect("item");
        assert_eq!(item.total_time_ms, 0);
        let kinds = item
            .sessions
            .iter()
            .map(|session| (session.is_pomodoro_session, session.is_break, session.duration_ms))
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec![(true, false, 1_500_000), (true, true, 300_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn phase_listener_sees_each_completion_once() {
        let harness = harness(PomodoroSettings::enabled(25, 5));
        let phases = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&phases);
        harness
            .controller
            .set_phase_listener(Arc::new(move |transition: PhaseTransition| {
                recorded.lock().expect("listener lock poisoned").push(transition.completed);
            }));
        let completed = move || phases.lock().expect("listener lock poisoned").clone();

        harness.controller.start().expect("start");
        advance(1_500_500).await;
        assert_eq!(completed(), vec![CompletedPhase::Focus]);

        advance(300_000).await;
        assert_eq!(completed(), vec![CompletedPhase::Focus, CompletedPhase::Break]);

        advance(1_500_000).await;
        assert_eq!(
            completed(),
            vec![CompletedPhase::Focus, CompletedPhase::Break, CompletedPhase::Focus]
        );
        assert_eq!(harness.sink.triggers().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_is_not_armed_once_stopped_or_paused() {
        let harness = harness(PomodoroSettings::default());
        harness.controller.start().expect("start");
        harness.controller.pause().expect("pause");
        harness.controller.start_ticking();
        assert!(lock(&harness.controller.ticker).is_none());

        harness.controller.resume().expect("resume");
        assert!(lock(&harness.controller.ticker).is_some());
        harness.controller.stop().expect("session");
        harness.controller.start_ticking();
        assert!(lock(&harness.controller.ticker).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_pomodoro_countdown() {
        let harness = harness(PomodoroSettings::enabled(25, 5));
        harness.controller.start().expect("start");
        advance(600_000).await;
        harness.controller.pause().expect("pause");
        let frozen = harness.controller.pomodoro();
        assert!(frozen.paused);
        assert_eq!(frozen.time_left_ms, 900_000);

        advance(1_800_000).await;
        assert_eq!(harness.controller.pomodoro(), frozen);
        assert!(harness.sink.triggers().is_empty());

        harness.controller.resume().expect("resume");
        advance(900_500).await;
        assert!(harness.controller.pomodoro().is_break);
        assert_eq!(harness.sink.triggers(), vec![SyncTrigger::Pomodoro]);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_off_discards_countdown_and_on_restarts_focus() {
        let harness = harness(PomodoroSettings::enabled(25, 5));
        harness.controller.start().expect("start");
        advance(60_000).await;

        let off = harness.controller.toggle_pomodoro().expect("toggle off");
        assert_eq!(off.mode, PomodoroMode::Off);
        let on = harness.controller.toggle_pomodoro().expect("toggle on");
        assert_eq!(on.mode, PomodoroMode::On);
        assert_eq!(on.time_left_ms, 1_500_000);
        assert!(!on.is_break);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_update_applies_to_next_phase() {
        let harness = harness(PomodoroSettings::enabled(25, 5));
        harness.controller.start().expect("start");
        advance(60_500).await;

        let phase = harness
            .controller
            .update_settings(PomodoroSettings::enabled(50, 10));
        assert_eq!(phase.time_left_ms, 1_440_000);
        assert_eq!(harness.sink.triggers(), vec![SyncTrigger::Project]);

        advance(1_440_000).await;
        let phase = harness.controller.pomodoro();
        assert!(phase.is_break);
        assert_eq!(phase.time_left_ms, 600_000);

        let snapshot = harness.snapshots.current().expect("snapshot");
        assert_eq!(
            snapshot.item("item-1").expect("item").pomodoro,
            PomodoroSettings::enabled(50, 10)
        );

        let phase = harness
            .controller
            .update_settings(PomodoroSettings::default());
        assert_eq!(phase.mode, PomodoroMode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_ends_ticks() {
        let harness = harness(PomodoroSettings::enabled(25, 5));
        harness.controller.start().expect("start");
        advance(5_000).await;
        harness.controller.stop().expect("session");

        advance(3_600_000).await;
        assert_eq!(harness.controller.state().status, TimerStatus::Idle);
        assert_eq!(harness.controller.pomodoro().mode, PomodoroMode::Off);
        assert_eq!(harness.sink.triggers(), vec![SyncTrigger::Session]);
    }
}
