use crate::domain::models::{Session, Snapshot};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalStore, SNAPSHOT_KEY};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory owner of the application snapshot, written through to the local store.
pub struct SnapshotRepository {
    store: Arc<dyn LocalStore>,
    snapshot: Mutex<Snapshot>,
}

impl SnapshotRepository {
    /// Restores the persisted snapshot. Missing or unreadable data yields an
    /// empty snapshot so startup is never blocked.
    pub fn load(store: Arc<dyn LocalStore>) -> Self {
        let snapshot = match read_snapshot(store.as_ref()) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => Snapshot::default(),
            Err(error) => {
                tracing::warn!("Falling back to empty snapshot: {}", error);
                Snapshot::default()
            }
        };
        Self {
            store,
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn current(&self) -> Result<Snapshot, InfraError> {
        Ok(self.lock()?.clone())
    }

    /// Replaces local state wholesale; used by the download path.
    pub fn replace(&self, snapshot: Snapshot) -> Result<(), InfraError> {
        let mut guard = self.lock()?;
        *guard = snapshot;
        persist(self.store.as_ref(), &guard)
    }

    pub fn update<F, R>(&self, mutate: F) -> Result<R, InfraError>
    where
        F: FnOnce(&mut Snapshot) -> R,
    {
        let mut guard = self.lock()?;
        let result = mutate(&mut guard);
        persist(self.store.as_ref(), &guard)?;
        Ok(result)
    }

    pub fn append_session(&self, item_id: &str, session: Session) -> Result<bool, InfraError> {
        self.update(|snapshot| snapshot.append_session(item_id, session))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>, InfraError> {
        self.snapshot
            .lock()
            .map_err(|error| InfraError::Persistence(format!("snapshot lock poisoned: {error}")))
    }
}

fn read_snapshot(store: &dyn LocalStore) -> Result<Option<Snapshot>, InfraError> {
    let Some(raw) = store.get(SNAPSHOT_KEY)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

fn persist(store: &dyn LocalStore, snapshot: &Snapshot) -> Result<(), InfraError> {
    let encoded = serde_json::to_vec(snapshot)?;
    store.set(SNAPSHOT_KEY, &encoded)
}
