use crate::domain::error::TimerError;
use crate::domain::models::{Session, TimerState, TimerStatus};
use chrono::{DateTime, Utc};

/// Elapsed-time tracker for one tracked item.
///
/// Every operation takes the current instant explicitly. Elapsed time is
/// accumulated from the delta since the last anchor, so late or missed ticks
/// never change the total.
#[derive(Debug, Clone, Default)]
pub struct StopwatchTimer {
    status: TimerStatus,
    current_session: Option<Session>,
    elapsed_ms: u64,
    last_tick: Option<DateTime<Utc>>,
}

impl StopwatchTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TimerStatus {
        self.status
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn state(&self) -> TimerState {
        TimerState {
            status: self.status,
            current_session: self.current_session.clone(),
            elapsed_ms: self.elapsed_ms,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        if self.status != TimerStatus::Idle {
            return Err(TimerError::AlreadyRunning);
        }
        self.current_session = Some(Session::begin(now));
        self.status = TimerStatus::Running;
        self.elapsed_ms = 0;
        self.last_tick = Some(now);
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<u64, TimerError> {
        if self.status != TimerStatus::Running {
            return Err(TimerError::NotRunning);
        }
        self.accrue(now);
        self.last_tick = None;
        self.status = TimerStatus::Paused;
        Ok(self.elapsed_ms)
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TimerError> {
        if self.status != TimerStatus::Paused {
            return Err(TimerError::NotPaused);
        }
        self.last_tick = Some(now);
        self.status = TimerStatus::Running;
        Ok(())
    }

    /// Finalizes the active session and resets to idle. Returns `None` when
    /// no session was active.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<Session> {
        if self.status == TimerStatus::Running {
            self.accrue(now);
        }
        let session = self.current_session.take().map(|mut session| {
            session.end_time = Some(now.max(session.start_time));
            session.duration_ms = self.elapsed_ms;
            session
        });

        self.status = TimerStatus::Idle;
        self.elapsed_ms = 0;
        self.last_tick = None;
        session
    }

    /// Accrues time since the previous anchor. No-op unless running.
    pub fn tick(&mut self, now: DateTime<Utc>) -> u64 {
        if self.status == TimerStatus::Running {
            self.accrue(now);
        }
        self.elapsed_ms
    }

    fn accrue(&mut self, now: DateTime<Utc>) {
        let Some(last_tick) = self.last_tick else {
            return;
        };
        self.elapsed_ms = self.elapsed_ms.saturating_add(delta_ms(last_tick, now));
        // A clock that moved backwards keeps the old anchor so nothing is counted twice.
        if now > last_tick {
            self.last_tick = Some(now);
        }
    }
}

pub(crate) fn delta_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn origin() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        origin() + Duration::milliseconds(ms)
    }

    #[test]
    fn paused_gap_is_excluded_from_session_duration() {
        let mut timer = StopwatchTimer::new();
        timer.start(at(0)).expect("start");
        for second in 1..=125 {
            timer.tick(at(second * 1_000));
        }
        assert_eq!(timer.pause(at(125_000)).expect("pause"), 125_000);
        assert_eq!(timer.tick(at(128_000)), 125_000);
        timer.resume(at(130_000)).expect("resume");
        timer.tick(at(131_000));

        let session = timer.stop(at(200_000)).expect("session");
        assert_eq!(session.duration_ms, 195_000);
        assert_eq!(session.start_time, at(0));
        assert_eq!(session.end_time, Some(at(200_000)));
        assert_eq!(timer.status(), TimerStatus::Idle);
        assert_eq!(timer.elapsed_ms(), 0);
    }

    #[test]
    fn misuse_is_reported() {
        let mut timer = StopwatchTimer::new();
        assert_eq!(timer.pause(at(0)), Err(TimerError::NotRunning));
        assert_eq!(timer.resume(at(0)), Err(TimerError::NotPaused));
        assert!(timer.stop(at(0)).is_none());

        timer.start(at(0)).expect("start");
        assert_eq!(timer.start(at(1)), Err(TimerError::AlreadyRunning));
        assert_eq!(timer.resume(at(1)), Err(TimerError::NotPaused));
        timer.pause(at(2)).expect("pause");
        assert_eq!(timer.pause(at(3)), Err(TimerError::NotRunning));
        assert_eq!(timer.start(at(3)), Err(TimerError::AlreadyRunning));
    }

    #[test]
    fn stop_while_paused_keeps_accrued_time() {
        let mut timer = StopwatchTimer::new();
        timer.start(at(0)).expect("start");
        timer.pause(at(4_500)).expect("pause");
        let session = timer.stop(at(60_000)).expect("session");
        assert_eq!(session.duration_ms, 4_500);
    }

    #[test]
    fn backwards_clock_adds_nothing() {
        let mut timer = StopwatchTimer::new();
        timer.start(at(10_000)).expect("start");
        assert_eq!(timer.tick(at(5_000)), 0);
        assert_eq!(timer.tick(at(12_000)), 2_000);
    }

    fn segment() -> impl Strategy<Value = (i64, i64, i64)> {
        (1i64..60_000, 0i64..60_000, 1i64..3_500)
    }

    // Property: elapsed time at stop equals the sum of running intervals regardless of tick jitter
    proptest! {
        #[test]
        fn elapsed_matches_running_intervals(segments in prop::collection::vec(segment(), 1..8)) {
            let mut timer = StopwatchTimer::new();
            let mut now = 0i64;
            let mut expected = 0u64;
            timer.start(at(now)).expect("start");

            for (index, (run_ms, pause_ms, tick_step)) in segments.iter().enumerate() {
                let run_end = now + run_ms;
                let mut tick_at = now + tick_step;
                while tick_at < run_end {
                    timer.tick(at(tick_at));
                    tick_at += tick_step;
                }
                now = run_end;
                expected += *run_ms as u64;

                if index + 1 == segments.len() {
                    break;
                }
                timer.pause(at(now)).expect("pause");
                now += pause_ms;
                timer.tick(at(now));
                timer.resume(at(now)).expect("resume");
            }

            let session = timer.stop(at(now)).expect("session");
            prop_assert_eq!(session.duration_ms, expected);
        }
    }
}
