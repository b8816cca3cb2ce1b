use crate::application::sync_queue::SyncEventQueue;
use crate::domain::models::{SyncEvent, SyncPriority, SyncStatus, SyncTrigger};
use crate::infrastructure::config::SyncSettings;
use crate::infrastructure::error::SyncError;
use crate::infrastructure::remote_client::RemoteSyncClient;
use crate::infrastructure::scheduler::{system_clock, NowProvider, Scheduler, TimerHandle};
use crate::infrastructure::snapshot_repository::SnapshotRepository;
use crate::infrastructure::sync_state_repository::SyncStateRepository;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;

/// Receives state changes that should eventually reach the remote store.
pub trait SyncTriggerSink: Send + Sync {
    fn notify(&self, trigger: SyncTrigger);
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_exponent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_exponent: 8,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(self.max_exponent);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Idle,
    Offline,
    /// Another drain was in flight; a follow-up runs when it ends.
    Deferred,
    Synced { uploaded: usize, remaining: usize },
}

struct ScheduledDrain {
    handle: TimerHandle,
    priority: SyncPriority,
}

/// Decides when the queue is drained to the remote store.
///
/// Drains are debounced per priority, retried with capped exponential backoff
/// and never run concurrently. Scheduled callbacks hold only a weak reference,
/// so dropping the last `Arc` (or calling [`Self::shutdown`]) releases them.
pub struct SyncDispatcher<C>
where
    C: RemoteSyncClient + ?Sized + 'static,
{
    this: Weak<Self>,
    queue: SyncEventQueue,
    snapshots: Arc<SnapshotRepository>,
    sync_state: SyncStateRepository,
    remote: Arc<C>,
    settings: SyncSettings,
    retry_policy: RetryPolicy,
    scheduler: Scheduler,
    now_provider: NowProvider,
    online: AtomicBool,
    auto_sync: AtomicBool,
    in_flight: AtomicBool,
    rerun: AtomicBool,
    shut_down: AtomicBool,
    consecutive_failures: AtomicU32,
    scheduled: Mutex<Option<ScheduledDrain>>,
    retry: Mutex<Option<TimerHandle>>,
    periodic: Mutex<Option<TimerHandle>>,
}

impl<C> SyncDispatcher<C>
where
    C: RemoteSyncClient + ?Sized + 'static,
{
    pub fn new(
        queue: SyncEventQueue,
        snapshots: Arc<SnapshotRepository>,
        sync_state: SyncStateRepository,
        remote: Arc<C>,
        settings: SyncSettings,
        scheduler: Scheduler,
    ) -> Self {
        let auto_sync = settings.auto_sync;
        Self {
            this: Weak::new(),
            queue,
            snapshots,
            sync_state,
            remote,
            settings,
            retry_policy: RetryPolicy::default(),
            scheduler,
            now_provider: system_clock(),
            online: AtomicBool::new(true),
            auto_sync: AtomicBool::new(auto_sync),
            in_flight: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            scheduled: Mutex::new(None),
            retry: Mutex::new(None),
            periodic: Mutex::new(None),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Shares the dispatcher, starts the periodic task and schedules a
    /// recovery drain when events survived the previous run.
    pub fn start(self) -> Arc<Self> {
        let dispatcher = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            ..self
        });
        if dispatcher.auto_sync.load(Ordering::SeqCst) {
            dispatcher.start_periodic();
        }
        let pending = dispatcher.queue.len();
        if pending > 0 {
            tracing::info!("Recovering {} pending sync events", pending);
            dispatcher.schedule_drain(SyncPriority::High);
        }
        dispatcher
    }

    pub fn snapshots(&self) -> &Arc<SnapshotRepository> {
        &self.snapshots
    }

    pub fn enqueue(&self, trigger: SyncTrigger, priority: SyncPriority) -> SyncEvent {
        let event = self.queue.enqueue(trigger, priority);
        self.schedule_drain(priority);
        event
    }

    pub fn notify(&self, trigger: SyncTrigger) {
        self.enqueue(trigger, trigger.default_priority());
    }

    pub fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("Network restored; scheduling sync");
            self.enqueue(SyncTrigger::Online, SyncTrigger::Online.default_priority());
        } else if !online && was_online {
            tracing::info!("Network lost; holding {} pending sync events", self.queue.len());
        }
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        let was_enabled = self.auto_sync.swap(enabled, Ordering::SeqCst);
        if enabled == was_enabled {
            return;
        }
        if enabled {
            tracing::info!("Auto sync enabled");
            self.start_periodic();
            if !self.queue.is_empty() {
                self.schedule_drain(SyncPriority::High);
            }
        } else {
            tracing::info!("Auto sync disabled");
            self.cancel_timers();
        }
    }

    /// Enqueues a manual trigger and drains until the queue is empty,
    /// regardless of the auto-sync setting.
    pub async fn sync_now(&self) -> Result<SyncStatus, SyncError> {
        self.queue
            .enqueue(SyncTrigger::Manual, SyncTrigger::Manual.default_priority());
        loop {
            match self.drain().await? {
                DrainOutcome::Synced { remaining, .. } if remaining > 0 => continue,
                DrainOutcome::Offline => {
                    return Err(SyncError::Network("device is offline".to_string()));
                }
                _ => return Ok(self.status()),
            }
        }
    }

    /// Replaces the local snapshot with the remote copy (last writer wins)
    /// and returns the remote modification time. Holds the in-flight guard,
    /// so no upload can overwrite the remote with the discarded local state.
    pub async fn download_now(&self) -> Result<DateTime<Utc>, SyncError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(SyncError::Network("device is offline".to_string()));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::Busy);
        }
        let result = self.replace_from_remote().await;
        self.in_flight.store(false, Ordering::SeqCst);
        if self.rerun.swap(false, Ordering::SeqCst) {
            self.schedule_drain(SyncPriority::High);
        }
        result
    }

    pub fn status(&self) -> SyncStatus {
        let last_sync = self.sync_state.load().unwrap_or_else(|error| {
            tracing::warn!("Ignoring unreadable last sync time: {}", error);
            None
        });
        SyncStatus {
            pending_count: self.queue.len(),
            last_sync,
            is_syncing: self.in_flight.load(Ordering::SeqCst),
            is_online: self.online.load(Ordering::SeqCst),
            auto_sync_enabled: self.auto_sync.load(Ordering::SeqCst),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
        }
    }

    /// Cancels every scheduled callback. A drain already uploading finishes;
    /// pending events stay in the persisted queue for the next start.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_timers();
        tracing::info!("Sync dispatcher stopped with {} pending events", self.queue.len());
    }

    fn cancel_timers(&self) {
        lock(&self.scheduled).take();
        lock(&self.retry).take();
        lock(&self.periodic).take();
    }

    fn start_periodic(&self) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let this = self.this.clone();
        let handle = self
            .scheduler
            .schedule_every(self.settings.periodic_interval, move || {
                if let Some(dispatcher) = this.upgrade() {
                    dispatcher.on_periodic();
                }
            });
        *lock(&self.periodic) = Some(handle);
    }

    fn on_periodic(&self) {
        if !self.auto_sync.load(Ordering::SeqCst) || !self.online.load(Ordering::SeqCst) {
            return;
        }
        self.enqueue(SyncTrigger::Periodic, SyncTrigger::Periodic.default_priority());
    }

    /// Same-priority requests restart the wait. Across priorities the earlier
    /// deadline wins and the drain keeps the more urgent priority.
    fn schedule_drain(&self, priority: SyncPriority) {
        if self.shut_down.load(Ordering::SeqCst) || !self.auto_sync.load(Ordering::SeqCst) {
            return;
        }
        let delay = self.settings.debounce.delay_for(priority);
        let deadline = Instant::now() + delay;
        let mut priority = priority;
        let mut scheduled = lock(&self.scheduled);
        if let Some(existing) = scheduled.as_mut().filter(|existing| !existing.handle.is_finished()) {
            if existing.priority != priority {
                if existing.handle.deadline() <= deadline {
                    existing.priority = existing.priority.min(priority);
                    return;
                }
                priority = existing.priority.min(priority);
            }
        }
        *scheduled = Some(ScheduledDrain {
            handle: self.drain_after(delay),
            priority,
        });
    }

    fn schedule_retry(&self, delay: Duration) {
        if self.shut_down.load(Ordering::SeqCst) || !self.auto_sync.load(Ordering::SeqCst) {
            return;
        }
        *lock(&self.retry) = Some(self.drain_after(delay));
    }

    // The drain runs as its own task so replacing the timer never aborts an upload.
    fn drain_after(&self, delay: Duration) -> TimerHandle {
        let this = self.this.clone();
        let scheduler = self.scheduler.clone();
        self.scheduler.schedule_after(delay, move || {
            scheduler.spawn(async move {
                let Some(dispatcher) = this.upgrade() else {
                    return;
                };
                if dispatcher.shut_down.load(Ordering::SeqCst) {
                    return;
                }
                let _ = dispatcher.drain().await;
            });
        })
    }

    async fn drain(&self) -> Result<DrainOutcome, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.rerun.store(true, Ordering::SeqCst);
            tracing::debug!("Drain requested while another is in flight; deferring");
            return Ok(DrainOutcome::Deferred);
        }

        let result = self.upload_batch().await;
        self.in_flight.store(false, Ordering::SeqCst);

        match &result {
            Ok(DrainOutcome::Synced { uploaded, remaining }) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                lock(&self.retry).take();
                tracing::info!("Synced {} events; {} still pending", uploaded, remaining);
                if *remaining > 0 {
                    self.schedule_drain(SyncPriority::High);
                }
            }
            Ok(DrainOutcome::Offline) => {
                tracing::debug!("Skipping drain while offline");
            }
            Ok(_) => {}
            Err(error) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let delay = self.retry_policy.delay_for(failures);
                tracing::warn!(
                    "Sync failed (consecutive failures: {}): {}; retrying in {}s",
                    failures,
                    error,
                    delay.as_secs()
                );
                self.schedule_retry(delay);
            }
        }

        if self.rerun.swap(false, Ordering::SeqCst) {
            self.schedule_drain(SyncPriority::High);
        }
        result
    }

    async fn replace_from_remote(&self) -> Result<DateTime<Utc>, SyncError> {
        let remote = self.remote.download().await?;
        self.snapshots.replace(remote.snapshot)?;
        self.sync_state.save((self.now_provider)())?;
        tracing::info!("Replaced local snapshot with remote copy from {}", remote.updated_at);
        Ok(remote.updated_at)
    }

    async fn upload_batch(&self) -> Result<DrainOutcome, SyncError> {
        let batch = self.queue.drain(self.settings.max_batch);
        if batch.is_empty() {
            return Ok(DrainOutcome::Idle);
        }
        if !self.online.load(Ordering::SeqCst) {
            return Ok(DrainOutcome::Offline);
        }

        let snapshot = self.snapshots.current()?;
        self.remote.upload(&snapshot).await?;

        let ids = batch.into_iter().map(|event| event.id).collect::<Vec<_>>();
        self.queue.remove(&ids);
        if let Err(error) = self.sync_state.save((self.now_provider)()) {
            tracing::error!("Failed to record last sync time: {}", error);
        }
        Ok(DrainOutcome::Synced {
            uploaded: ids.len(),
            remaining: self.queue.len(),
        })
    }
}

impl<C> SyncTriggerSink for SyncDispatcher<C>
where
    C: RemoteSyncClient + ?Sized + 'static,
{
    fn notify(&self, trigger: SyncTrigger) {
        SyncDispatcher::notify(self, trigger);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
