pub mod config;
pub mod error;
pub mod identity_store;
pub mod local_store;
pub mod logging;
pub mod remote_client;
pub mod scheduler;
pub mod snapshot_repository;
pub mod storage;
pub mod sync_state_repository;
