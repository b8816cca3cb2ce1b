use crate::domain::models::{next_id, SyncEvent, SyncPriority, SyncTrigger};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalStore, QUEUE_KEY};
use crate::infrastructure::scheduler::{system_clock, NowProvider};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Durable, priority-ordered log of pending sync triggers.
///
/// Every mutation and its write to the local store happen under one lock, so
/// the persisted copy always matches the in-memory one. Write failures are
/// logged and the in-memory queue stays authoritative for this process.
pub struct SyncEventQueue {
    store: Arc<dyn LocalStore>,
    events: Mutex<Vec<SyncEvent>>,
    now_provider: NowProvider,
}

impl SyncEventQueue {
    pub fn load(store: Arc<dyn LocalStore>) -> Self {
        let events = match read_events(store.as_ref()) {
            Ok(events) => dedupe(events),
            Err(error) => {
                tracing::warn!("Discarding unreadable sync queue: {}", error);
                Vec::new()
            }
        };
        if !events.is_empty() {
            tracing::info!("Restored {} pending sync events", events.len());
        }
        Self {
            store,
            events: Mutex::new(events),
            now_provider: system_clock(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn enqueue(&self, trigger: SyncTrigger, priority: SyncPriority) -> SyncEvent {
        let event = SyncEvent {
            id: next_id("sync"),
            trigger,
            timestamp_ms: (self.now_provider)().timestamp_millis(),
            priority,
        };
        let mut events = self.lock();
        events.push(event.clone());
        self.persist(&events);
        tracing::debug!(
            "Enqueued sync event trigger={} priority={} pending={}",
            trigger.as_str(),
            u8::from(priority),
            events.len()
        );
        event
    }

    /// Selects up to `max_batch` events by priority, then age. Nothing is
    /// removed; call [`Self::remove`] once the batch is confirmed synced.
    pub fn drain(&self, max_batch: usize) -> Vec<SyncEvent> {
        let mut candidates = self.lock().clone();
        candidates.sort_by_key(|event| (event.priority, event.timestamp_ms));
        candidates.truncate(max_batch);
        candidates
    }

    pub fn remove(&self, ids: &[String]) -> usize {
        let ids = ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let mut events = self.lock();
        let before = events.len();
        events.retain(|event| !ids.contains(event.id.as_str()));
        let removed = before - events.len();
        if removed > 0 {
            self.persist(&events);
        }
        removed
    }

    pub fn clear(&self) {
        let mut events = self.lock();
        events.clear();
        self.persist(&events);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending events in arrival order.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SyncEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, events: &[SyncEvent]) {
        let result = serde_json::to_vec(events)
            .map_err(InfraError::from)
            .and_then(|encoded| self.store.set(QUEUE_KEY, &encoded));
        if let Err(error) = result {
            tracing::error!("Failed to persist sync queue: {}", error);
        }
    }
}

fn read_events(store: &dyn LocalStore) -> Result<Vec<SyncEvent>, InfraError> {
    let Some(raw) = store.get(QUEUE_KEY)? else {
        return Ok(Vec::new());
    };
    Ok(serde_json::from_slice(&raw)?)
}

fn dedupe(events: Vec<SyncEvent>) -> Vec<SyncEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(event.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::DEFAULT_MAX_BATCH;
    use crate::infrastructure::local_store::InMemoryLocalStore;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn stepping_clock() -> NowProvider {
        let base = DateTime::parse_from_rfc3339("2026-02-16T00:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc);
        let step = Arc::new(AtomicI64::new(0));
        Arc::new(move || base + Duration::milliseconds(step.fetch_add(100, Ordering::SeqCst)))
    }

    fn queue_on(store: Arc<InMemoryLocalStore>) -> SyncEventQueue {
        SyncEventQueue::load(store).with_now_provider(stepping_clock())
    }

    fn trigger_strategy() -> impl Strategy<Value = SyncTrigger> {
        prop_oneof![
            Just(SyncTrigger::Online),
            Just(SyncTrigger::Pomodoro),
            Just(SyncTrigger::Manual),
            Just(SyncTrigger::Session),
            Just(SyncTrigger::Project),
            Just(SyncTrigger::Category),
            Just(SyncTrigger::Periodic),
        ]
    }

    fn priority_strategy() -> impl Strategy<Value = SyncPriority> {
        prop_oneof![
            Just(SyncPriority::High),
            Just(SyncPriority::Normal),
            Just(SyncPriority::Low),
        ]
    }

    #[test]
    fn manual_is_selected_before_earlier_session() {
        let queue = queue_on(Arc::new(InMemoryLocalStore::default()));
        let session = queue.enqueue(SyncTrigger::Session, SyncPriority::Normal);
        let manual = queue.enqueue(SyncTrigger::Manual, SyncPriority::High);

        let batch = queue.drain(DEFAULT_MAX_BATCH);
        assert_eq!(batch, vec![manual, session]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn drain_respects_batch_size_and_remove_only_drops_selected() {
        let queue = queue_on(Arc::new(InMemoryLocalStore::default()));
        for _ in 0..7 {
            queue.enqueue(SyncTrigger::Category, SyncPriority::Normal);
        }
        let batch = queue.drain(DEFAULT_MAX_BATCH);
        assert_eq!(batch.len(), 5);

        let ids = batch.iter().map(|event| event.id.clone()).collect::<Vec<_>>();
        assert_eq!(queue.remove(&ids), 5);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.remove(&ids), 0);
        assert!(queue
            .events()
            .iter()
            .all(|event| !ids.contains(&event.id)));
    }

    #[test]
    fn queue_survives_reload_from_store() {
        let store = Arc::new(InMemoryLocalStore::default());
        let queue = queue_on(store.clone());
        let first = queue.enqueue(SyncTrigger::Pomodoro, SyncPriority::Normal);
        let second = queue.enqueue(SyncTrigger::Periodic, SyncPriority::Low);
        queue.remove(&[first.id.clone()]);

        let restored = queue_on(store.clone());
        assert_eq!(restored.events(), vec![second]);

        restored.clear();
        assert!(queue_on(store).is_empty());
    }

    #[test]
    fn corrupt_queue_falls_back_to_empty() {
        let store = Arc::new(InMemoryLocalStore::default());
        store.set(QUEUE_KEY, b"[{\"id\":").expect("seed corrupt queue");
        assert!(queue_on(store).is_empty());
    }

    #[test]
    fn duplicate_ids_are_dropped_on_restore() {
        let store = Arc::new(InMemoryLocalStore::default());
        let event = SyncEvent {
            id: "sync-dup".to_string(),
            trigger: SyncTrigger::Manual,
            timestamp_ms: 1,
            priority: SyncPriority::High,
        };
        let encoded = serde_json::to_vec(&vec![event.clone(), event.clone()]).expect("encode");
        store.set(QUEUE_KEY, &encoded).expect("seed");
        assert_eq!(queue_on(store).events(), vec![event]);
    }

    #[test]
    fn concurrent_enqueues_keep_unique_ids() {
        let store = Arc::new(InMemoryLocalStore::default());
        let queue = Arc::new(SyncEventQueue::load(store.clone()));
        let workers = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        queue.enqueue(SyncTrigger::Session, SyncPriority::Normal);
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().expect("worker");
        }

        let events = queue.events();
        assert_eq!(events.len(), 400);
        let ids = events.iter().map(|event| event.id.as_str()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 400);
        assert_eq!(SyncEventQueue::load(store).len(), 400);
    }

    // Property: selection is ordered by priority, then by enqueue time
    proptest! {
        #[test]
        fn selection_orders_by_priority_then_timestamp(
            entries in prop::collection::vec((trigger_strategy(), priority_strategy()), 1..30),
            max_batch in 1usize..10,
        ) {
            let queue = queue_on(Arc::new(InMemoryLocalStore::default()));
            for (trigger, priority) in &entries {
                queue.enqueue(*trigger, *priority);
            }

            let batch = queue.drain(max_batch);
            prop_assert_eq!(batch.len(), entries.len().min(max_batch));
            for pair in batch.windows(2) {
                prop_assert!((pair[0].priority, pair[0].timestamp_ms) <= (pair[1].priority, pair[1].timestamp_ms));
            }

            let most_urgent = entries.iter().map(|(_, priority)| *priority).min().expect("non-empty");
            prop_assert_eq!(batch[0].priority, most_urgent);
            if entries.iter().any(|(_, priority)| *priority == SyncPriority::High) {
                let high_count = entries.iter().filter(|(_, priority)| *priority == SyncPriority::High).count();
                prop_assert!(batch.iter().take(high_count.min(max_batch)).all(|event| event.priority == SyncPriority::High));
            }
            prop_assert_eq!(queue.len(), entries.len());
        }
    }
}
