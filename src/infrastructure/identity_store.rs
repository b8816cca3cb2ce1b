use crate::infrastructure::error::InfraError;
use keyring::credential::{CredentialBuilderApi, CredentialPersistence};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Signed-in user as seen by the remote store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

pub trait IdentityStore: Send + Sync {
    fn save_identity(&self, identity: &Identity) -> Result<(), InfraError>;
    fn load_identity(&self) -> Result<Option<Identity>, InfraError>;
    fn clear_identity(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringIdentityStore {
    service_name: String,
    account_name: String,
}

impl KeyringIdentityStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    /// False when the platform store forgets a credential once the entry
    /// that wrote it is dropped, as the keyring mock store does.
    pub fn persists_across_entries() -> bool {
        !matches!(
            keyring::default::default_credential_builder().persistence(),
            CredentialPersistence::EntryOnly | CredentialPersistence::ProcessOnly
        )
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringIdentityStore {
    fn default() -> Self {
        Self::new("tracksync.identity", "default")
    }
}

impl IdentityStore for KeyringIdentityStore {
    fn save_identity(&self, identity: &Identity) -> Result<(), InfraError> {
        let payload = serde_json::to_string(identity)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_identity(&self) -> Result<Option<Identity>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let identity = serde_json::from_str::<Identity>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(identity))
    }

    fn clear_identity(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    identity: Mutex<Option<Identity>>,
}

impl InMemoryIdentityStore {
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn save_identity(&self, identity: &Identity) -> Result<(), InfraError> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(identity.clone());
        Ok(())
    }

    fn load_identity(&self) -> Result<Option<Identity>, InfraError> {
        let guard = self
            .identity
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn clear_identity(&self) -> Result<(), InfraError> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
