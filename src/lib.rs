pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult, Dispatcher, SyncEngine};
pub use application::sync_dispatcher::{DrainOutcome, RetryPolicy, SyncDispatcher, SyncTriggerSink};
pub use application::sync_queue::SyncEventQueue;
pub use application::timer_controller::{PhaseListener, TimerController};
pub use domain::error::TimerError;
pub use domain::interval::{CompletedPhase, IntervalScheduler, PhaseTransition};
pub use domain::models::{
    PomodoroMode, PomodoroPhase, PomodoroSettings, Session, Snapshot, SyncEvent, SyncPriority,
    SyncStatus, SyncTrigger, TimerState, TimerStatus, TrackedItem,
};
pub use domain::stopwatch::StopwatchTimer;
pub use infrastructure::config::SyncSettings;
pub use infrastructure::error::{InfraError, SyncError};
pub use infrastructure::local_store::{InMemoryLocalStore, LocalStore, SqliteLocalStore};
pub use infrastructure::logging::init_logging;
pub use infrastructure::remote_client::{
    InMemoryRemoteStore, RemoteSnapshot, RemoteSyncClient, ReqwestRemoteSyncClient,
};
pub use infrastructure::scheduler::{Scheduler, TimerHandle};
