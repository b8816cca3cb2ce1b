use crate::domain::error::TimerError;
use crate::domain::models::{PomodoroMode, PomodoroPhase, PomodoroSettings};
use crate::domain::stopwatch::delta_ms;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedPhase {
    Focus,
    Break,
}

/// One zero crossing of the focus/break countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub completed: CompletedPhase,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Focus/break cycle layered on top of a stopwatch.
///
/// Settings are captured when a phase is loaded, so edits made while a phase
/// counts down only affect the next phase.
#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    settings: PomodoroSettings,
    phase: PomodoroPhase,
    phase_length_ms: u64,
    last_tick: Option<DateTime<Utc>>,
}

impl IntervalScheduler {
    pub fn new(settings: PomodoroSettings) -> Self {
        Self {
            settings,
            phase: PomodoroPhase::default(),
            phase_length_ms: 0,
            last_tick: None,
        }
    }

    pub fn phase(&self) -> PomodoroPhase {
        self.phase.clone()
    }

    pub fn settings(&self) -> PomodoroSettings {
        self.settings
    }

    pub fn is_on(&self) -> bool {
        self.phase.mode == PomodoroMode::On
    }

    pub fn toggle_on(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        if !self.settings.pomodoro_enabled {
            return Err(TimerError::PomodoroDisabled);
        }
        if self.is_on() {
            return Ok(());
        }
        self.phase_length_ms = self.settings.focus_duration_ms();
        self.phase = PomodoroPhase {
            mode: PomodoroMode::On,
            is_break: false,
            time_left_ms: self.phase_length_ms,
            paused: false,
        };
        self.last_tick = Some(now);
        Ok(())
    }

    pub fn toggle_off(&mut self) {
        self.phase = PomodoroPhase::default();
        self.phase_length_ms = 0;
        self.last_tick = None;
    }

    pub fn toggle(&mut self, now: DateTime<Utc>) -> Result<PomodoroMode, TimerError> {
        if self.is_on() {
            self.toggle_off();
        } else {
            self.toggle_on(now)?;
        }
        Ok(self.phase.mode)
    }

    /// Counts down to `now` and then freezes the remaining time.
    pub fn suspend(&mut self, now: DateTime<Utc>) -> Vec<PhaseTransition> {
        if !self.is_on() || self.phase.paused {
            return Vec::new();
        }
        let transitions = self.tick(now);
        self.phase.paused = true;
        self.last_tick = None;
        transitions
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        if !self.is_on() || !self.phase.paused {
            return;
        }
        self.phase.paused = false;
        self.last_tick = Some(now);
    }

    pub fn update_settings(&mut self, settings: PomodoroSettings) {
        self.settings = settings;
        if !settings.pomodoro_enabled && self.is_on() {
            self.toggle_off();
        }
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<PhaseTransition> {
        if !self.is_on() || self.phase.paused {
            return Vec::new();
        }
        let Some(last_tick) = self.last_tick else {
            self.last_tick = Some(now);
            return Vec::new();
        };
        let mut remaining = delta_ms(last_tick, now);
        if now > last_tick {
            self.last_tick = Some(now);
        }

        let mut transitions = Vec::new();
        let mut cursor = last_tick;
        while remaining > 0 {
            if remaining < self.phase.time_left_ms {
                self.phase.time_left_ms -= remaining;
                break;
            }
            remaining -= self.phase.time_left_ms;
            cursor += Duration::milliseconds(
                i64::try_from(self.phase.time_left_ms).unwrap_or(i64::MAX),
            );
            transitions.push(self.cross(cursor));
        }
        transitions
    }

    fn cross(&mut self, completed_at: DateTime<Utc>) -> PhaseTransition {
        let completed = if self.phase.is_break {
            CompletedPhase::Break
        } else {
            CompletedPhase::Focus
        };
        let transition = PhaseTransition {
            completed,
            duration_ms: self.phase_length_ms,
            completed_at,
        };

        self.phase.is_break = !self.phase.is_break;
        self.phase_length_ms = if self.phase.is_break {
            self.settings.break_duration_ms()
        } else {
            self.settings.focus_duration_ms()
        };
        self.phase.time_left_ms = self.phase_length_ms;
        transition
    }
}
