use crate::infrastructure::error::InfraError;
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> NowProvider {
    Arc::new(Utc::now)
}

/// Wall-clock instants advanced by tokio's monotonic clock.
///
/// Immune to wall-clock jumps, and follows the paused clock in tests.
pub fn monotonic_clock() -> NowProvider {
    let anchor_wall = Utc::now();
    let anchor = Instant::now();
    Arc::new(move || {
        anchor_wall + TimeDelta::from_std(anchor.elapsed()).unwrap_or(TimeDelta::zero())
    })
}

/// Registers one-shot and periodic callbacks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    pub fn current() -> Result<Self, InfraError> {
        let handle = Handle::try_current().map_err(|error| {
            InfraError::InvalidConfig(format!("scheduler requires a tokio runtime: {error}"))
        })?;
        Ok(Self { handle })
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    pub fn schedule_after<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let _runtime = self.handle.enter();
        let deadline = Instant::now() + delay;
        let task = self.handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            callback();
        });
        TimerHandle { task, deadline }
    }

    /// First invocation happens one `period` from now.
    pub fn schedule_every<F>(&self, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let _runtime = self.handle.enter();
        let first = Instant::now() + period;
        let task = self.handle.spawn(async move {
            let mut interval = tokio::time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                callback();
            }
        });
        TimerHandle {
            task,
            deadline: first,
        }
    }
}

/// Cancellable registration returned by [`Scheduler`]. Dropping it cancels the callback.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
    deadline: Instant,
}

impl TimerHandle {
    /// For periodic tasks this is the first firing.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
