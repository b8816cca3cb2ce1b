use crate::application::sync_dispatcher::SyncDispatcher;
use crate::application::sync_queue::SyncEventQueue;
use crate::application::timer_controller::TimerController;
use crate::infrastructure::config::{ensure_default_configs, load_sync_settings, save_auto_sync, SyncSettings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::identity_store::KeyringIdentityStore;
use crate::infrastructure::local_store::{LocalStore, SqliteLocalStore};
use crate::infrastructure::remote_client::{
    InMemoryRemoteStore, RemoteSyncClient, ReqwestRemoteSyncClient,
};
use crate::infrastructure::scheduler::{monotonic_clock, Scheduler};
use crate::infrastructure::snapshot_repository::SnapshotRepository;
use crate::infrastructure::storage::initialize_database;
use crate::infrastructure::sync_state_repository::SyncStateRepository;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub settings: SyncSettings,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("tracksync.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let settings = load_sync_settings(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
        settings,
    })
}

pub type Dispatcher = SyncDispatcher<dyn RemoteSyncClient>;

/// Running sync engine for one workspace. Holds at most one timer per item.
pub struct SyncEngine {
    dispatcher: Arc<Dispatcher>,
    snapshots: Arc<SnapshotRepository>,
    settings: SyncSettings,
    config_dir: PathBuf,
    scheduler: Scheduler,
    timers: Mutex<HashMap<String, Arc<TimerController>>>,
}

impl SyncEngine {
    /// Wires the engine on the current tokio runtime. Without a configured
    /// remote endpoint the engine syncs to an in-process store.
    pub fn start(workspace: &BootstrapResult) -> Result<Self, InfraError> {
        let remote: Arc<dyn RemoteSyncClient> = match workspace.settings.remote.endpoint.as_deref() {
            Some(endpoint) => {
                if !KeyringIdentityStore::persists_across_entries() {
                    tracing::warn!("Platform keyring does not persist identities; uploads will be unauthenticated");
                }
                Arc::new(ReqwestRemoteSyncClient::new(
                    endpoint,
                    workspace.settings.remote.table.clone(),
                    Arc::new(KeyringIdentityStore::default()),
                ))
            }
            None => {
                tracing::info!("No remote endpoint configured; syncing to local memory");
                Arc::new(InMemoryRemoteStore::default())
            }
        };
        Self::start_with_remote(workspace, remote)
    }

    pub fn start_with_remote(
        workspace: &BootstrapResult,
        remote: Arc<dyn RemoteSyncClient>,
    ) -> Result<Self, InfraError> {
        let scheduler = Scheduler::current()?;
        let clock = monotonic_clock();
        let store: Arc<dyn LocalStore> = Arc::new(SqliteLocalStore::new(&workspace.database_path));
        let snapshots = Arc::new(SnapshotRepository::load(Arc::clone(&store)));
        let queue = SyncEventQueue::load(Arc::clone(&store)).with_now_provider(clock.clone());

        let dispatcher = SyncDispatcher::new(
            queue,
            Arc::clone(&snapshots),
            SyncStateRepository::new(store),
            remote,
            workspace.settings.clone(),
            scheduler.clone(),
        )
        .with_now_provider(clock)
        .start();
        tracing::info!(
            "Sync engine started at {}",
            workspace.workspace_root.display()
        );

        Ok(Self {
            dispatcher,
            snapshots,
            settings: workspace.settings.clone(),
            config_dir: workspace.config_dir.clone(),
            scheduler,
            timers: Mutex::new(HashMap::new()),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn snapshots(&self) -> &Arc<SnapshotRepository> {
        &self.snapshots
    }

    pub fn timer(&self, item_id: &str) -> Arc<TimerController> {
        let mut timers = lock(&self.timers);
        let timer = timers.entry(item_id.to_string()).or_insert_with(|| {
            Arc::new(
                TimerController::new(
                    item_id,
                    Arc::clone(&self.snapshots),
                    self.dispatcher.clone(),
                    self.scheduler.clone(),
                    self.settings.tick_interval,
                )
                .with_now_provider(monotonic_clock()),
            )
        });
        Arc::clone(timer)
    }

    /// Applies the toggle and writes it back to `sync.json`.
    pub fn set_auto_sync(&self, enabled: bool) -> Result<(), InfraError> {
        save_auto_sync(&self.config_dir, enabled)?;
        self.dispatcher.set_auto_sync(enabled);
        Ok(())
    }

    /// Stops every timer's ticks and the dispatcher. Open sessions stay open.
    pub fn shutdown(&self) {
        for (_, timer) in lock(&self.timers).drain() {
            timer.shutdown();
        }
        self.dispatcher.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
