use crate::infrastructure::error::InfraError;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "tracksync.log";
const DEFAULT_DIRECTIVE: &str = "tracksync=info";

/// Installs the global subscriber writing to `<logs_dir>/tracksync.log`.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(logs_dir: &Path) -> Result<(), InfraError> {
    fs::create_dir_all(logs_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("failed to install log subscriber: {error}")))
}
