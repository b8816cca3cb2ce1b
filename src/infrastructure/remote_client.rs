use crate::domain::models::Snapshot;
use crate::infrastructure::error::SyncError;
use crate::infrastructure::identity_store::{Identity, IdentityStore};
use crate::infrastructure::scheduler::NowProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub snapshot: Snapshot,
    pub updated_at: DateTime<Utc>,
}

/// Bidirectional transfer of the whole snapshot. Owns no scheduling logic.
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    async fn upload(&self, snapshot: &Snapshot) -> Result<(), SyncError>;

    async fn download(&self) -> Result<RemoteSnapshot, SyncError>;
}

/// Client for a REST row store holding one `{user_id, data, updated_at}` row per user.
pub struct ReqwestRemoteSyncClient<I>
where
    I: IdentityStore,
{
    client: Client,
    endpoint: String,
    table: String,
    identity_store: Arc<I>,
    now_provider: NowProvider,
}

impl<I> ReqwestRemoteSyncClient<I>
where
    I: IdentityStore,
{
    pub fn new(endpoint: impl Into<String>, table: impl Into<String>, identity_store: Arc<I>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            table: table.into(),
            identity_store,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn identity(&self) -> Result<Identity, SyncError> {
        self.identity_store
            .load_identity()?
            .filter(|identity| {
                !identity.user_id.trim().is_empty() && !identity.access_token.trim().is_empty()
            })
            .ok_or(SyncError::Unauthenticated)
    }

    fn table_endpoint(&self) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|error| SyncError::RemoteRejected(format!("invalid remote endpoint: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                SyncError::RemoteRejected("remote endpoint URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("rest");
            segments.push("v1");
            segments.push(&self.table);
        }
        Ok(url)
    }

    fn upload_endpoint(&self) -> Result<Url, SyncError> {
        let mut url = self.table_endpoint()?;
        url.query_pairs_mut().append_pair("on_conflict", "user_id");
        Ok(url)
    }

    fn download_endpoint(&self, user_id: &str) -> Result<Url, SyncError> {
        let mut url = self.table_endpoint()?;
        url.query_pairs_mut()
            .append_pair("user_id", &format!("eq.{user_id}"))
            .append_pair("select", "data,updated_at");
        Ok(url)
    }
}

#[derive(Debug, serde::Serialize)]
struct UploadRow<'a> {
    user_id: &'a str,
    data: &'a Snapshot,
    updated_at: String,
}

#[derive(Debug, serde::Deserialize)]
struct DownloadRow {
    data: Snapshot,
    updated_at: String,
}

#[async_trait]
impl<I> RemoteSyncClient for ReqwestRemoteSyncClient<I>
where
    I: IdentityStore,
{
    async fn upload(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        let identity = self.identity()?;
        let endpoint = self.upload_endpoint()?;
        let row = UploadRow {
            user_id: &identity.user_id,
            data: snapshot,
            updated_at: (self.now_provider)().to_rfc3339(),
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&identity.access_token)
            .header("Prefer", "resolution=merge-duplicates")
            .json(&[row])
            .send()
            .await
            .map_err(|error| SyncError::Network(format!("network error while uploading snapshot: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(status, &body));
        }
        Ok(())
    }

    async fn download(&self) -> Result<RemoteSnapshot, SyncError> {
        let identity = self.identity()?;
        let endpoint = self.download_endpoint(&identity.user_id)?;

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(&identity.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| SyncError::Network(format!("network error while downloading snapshot: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| SyncError::Network(format!("failed reading snapshot response: {error}")))?;
        if !status.is_success() {
            return Err(classify_http_error(status, &body));
        }

        let rows: Vec<DownloadRow> = serde_json::from_str(&body)
            .map_err(|error| SyncError::RemoteRejected(format!("invalid snapshot payload: {error}")))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::RemoteRejected("no remote snapshot".to_string()))?;
        let updated_at = DateTime::parse_from_rfc3339(&row.updated_at)
            .map_err(|error| {
                SyncError::RemoteRejected(format!("invalid updated_at '{}': {error}", row.updated_at))
            })?
            .with_timezone(&Utc);

        Ok(RemoteSnapshot {
            snapshot: row.data,
            updated_at,
        })
    }
}

fn classify_http_error(status: StatusCode, body: &str) -> SyncError {
    let message = if body.trim().is_empty() {
        format!("http {}", status.as_u16())
    } else {
        format!("http {}; body={}", status.as_u16(), body.trim())
    };
    match status.as_u16() {
        401 | 403 => SyncError::Unauthenticated,
        408 | 425 | 429 | 500..=599 => SyncError::Network(message),
        _ => SyncError::RemoteRejected(message),
    }
}

/// Remote store kept in process memory, for local-only mode.
pub struct InMemoryRemoteStore {
    stored: Mutex<Option<RemoteSnapshot>>,
    now_provider: NowProvider,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            stored: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }
}

impl InMemoryRemoteStore {
    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn stored(&self) -> Result<Option<RemoteSnapshot>, SyncError> {
        let guard = self
            .stored
            .lock()
            .map_err(|error| SyncError::RemoteRejected(format!("remote store lock poisoned: {error}")))?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl RemoteSyncClient for InMemoryRemoteStore {
    async fn upload(&self, snapshot: &Snapshot) -> Result<(), SyncError> {
        let mut guard = self
            .stored
            .lock()
            .map_err(|error| SyncError::RemoteRejected(format!("remote store lock poisoned: {error}")))?;
        let unchanged = guard
            .as_ref()
            .is_some_and(|existing| &existing.snapshot == snapshot);
        if !unchanged {
            *guard = Some(RemoteSnapshot {
                snapshot: snapshot.clone(),
                updated_at: (self.now_provider)(),
            });
        }
        Ok(())
    }

    async fn download(&self) -> Result<RemoteSnapshot, SyncError> {
        self.stored()?
            .ok_or_else(|| SyncError::RemoteRejected("no remote snapshot".to_string()))
    }
}
