use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_store::{LocalStore, LAST_SYNC_KEY};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Last successful sync instant, stored as RFC 3339 text.
#[derive(Clone)]
pub struct SyncStateRepository {
    store: Arc<dyn LocalStore>,
}

impl SyncStateRepository {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Result<Option<DateTime<Utc>>, InfraError> {
        let Some(raw) = self.store.get(LAST_SYNC_KEY)? else {
            return Ok(None);
        };
        let raw = String::from_utf8(raw).map_err(|error| {
            InfraError::Persistence(format!("last sync time is not valid UTF-8: {error}"))
        })?;
        let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|error| {
            InfraError::Persistence(format!("invalid last sync time '{raw}': {error}"))
        })?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    pub fn save(&self, last_sync_time: DateTime<Utc>) -> Result<(), InfraError> {
        self.store
            .set(LAST_SYNC_KEY, last_sync_time.to_rfc3339().as_bytes())
    }

    pub fn clear(&self) -> Result<(), InfraError> {
        self.store.remove(LAST_SYNC_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_store::InMemoryLocalStore;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T12:30:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn save_then_load_returns_same_instant() {
        let repository = SyncStateRepository::new(Arc::new(InMemoryLocalStore::default()));
        assert_eq!(repository.load().expect("load empty"), None);

        repository.save(fixed_time()).expect("save");
        assert_eq!(repository.load().expect("load"), Some(fixed_time()));

        repository.clear().expect("clear");
        assert_eq!(repository.load().expect("load cleared"), None);
    }

    #[test]
    fn corrupt_value_is_reported() {
        let store = Arc::new(InMemoryLocalStore::default());
        store.set(LAST_SYNC_KEY, b"yesterday").expect("seed");
        let repository = SyncStateRepository::new(store);
        assert!(matches!(repository.load(), Err(InfraError::Persistence(_))));
    }
}
