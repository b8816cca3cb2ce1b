use crate::domain::models::SyncPriority;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const SYNC_JSON: &str = "sync.json";
const DEFAULT_TABLE: &str = "user_data";
const DEFAULT_PERIODIC_INTERVAL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_MAX_BATCH: usize = 5;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceDelays {
    pub high: Duration,
    pub normal: Duration,
    pub low: Duration,
}

impl Default for DebounceDelays {
    fn default() -> Self {
        Self {
            high: SyncPriority::High.default_delay(),
            normal: SyncPriority::Normal.default_delay(),
            low: SyncPriority::Low.default_delay(),
        }
    }
}

impl DebounceDelays {
    pub fn delay_for(&self, priority: SyncPriority) -> Duration {
        match priority {
            SyncPriority::High => self.high,
            SyncPriority::Normal => self.normal,
            SyncPriority::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub endpoint: Option<String>,
    pub table: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub auto_sync: bool,
    pub periodic_interval: Duration,
    pub max_batch: usize,
    pub debounce: DebounceDelays,
    pub tick_interval: Duration,
    pub remote: RemoteSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            periodic_interval: Duration::from_secs(DEFAULT_PERIODIC_INTERVAL_SECONDS),
            max_batch: DEFAULT_MAX_BATCH,
            debounce: DebounceDelays::default(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            remote: RemoteSettings::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncConfigFile {
    schema: u8,
    #[serde(default = "default_true")]
    auto_sync: bool,
    #[serde(default = "default_periodic_interval_seconds")]
    periodic_interval_seconds: u64,
    #[serde(default = "default_max_batch")]
    max_batch: usize,
    #[serde(default)]
    debounce_ms: DebounceMsFile,
    #[serde(default = "default_tick_interval_ms")]
    tick_interval_ms: u64,
    #[serde(default)]
    remote: RemoteFile,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebounceMsFile {
    high: u64,
    normal: u64,
    low: u64,
}

impl Default for DebounceMsFile {
    fn default() -> Self {
        Self {
            high: 1_000,
            normal: 5_000,
            low: 30_000,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    endpoint: Option<String>,
    table: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_periodic_interval_seconds() -> u64 {
    DEFAULT_PERIODIC_INTERVAL_SECONDS
}

fn default_max_batch() -> usize {
    DEFAULT_MAX_BATCH
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        SYNC_JSON,
        serde_json::json!({
            "schema": 1,
            "autoSync": true,
            "periodicIntervalSeconds": DEFAULT_PERIODIC_INTERVAL_SECONDS,
            "maxBatch": DEFAULT_MAX_BATCH,
            "debounceMs": {
                "high": 1000,
                "normal": 5000,
                "low": 30000
            },
            "tickIntervalMs": DEFAULT_TICK_INTERVAL_MS,
            "remote": {
                "endpoint": null,
                "table": DEFAULT_TABLE
            }
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_sync_settings(config_dir: &Path) -> Result<SyncSettings, InfraError> {
    let path = config_dir.join(SYNC_JSON);
    let file: SyncConfigFile = serde_json::from_value(read_config(&path)?)?;

    if file.max_batch == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "maxBatch must be >= 1 in {}",
            path.display()
        )));
    }
    if file.periodic_interval_seconds == 0 || file.tick_interval_ms == 0 {
        return Err(InfraError::InvalidConfig(format!(
            "periodicIntervalSeconds and tickIntervalMs must be > 0 in {}",
            path.display()
        )));
    }

    let endpoint = file
        .remote
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.trim_end_matches('/').to_string());
    if let Some(endpoint) = endpoint.as_deref() {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(InfraError::InvalidConfig(format!(
                "remote.endpoint must include http:// or https:// in {}",
                path.display()
            )));
        }
    }
    let table = file
        .remote
        .table
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_TABLE)
        .to_string();

    Ok(SyncSettings {
        auto_sync: file.auto_sync,
        periodic_interval: Duration::from_secs(file.periodic_interval_seconds),
        max_batch: file.max_batch,
        debounce: DebounceDelays {
            high: Duration::from_millis(file.debounce_ms.high),
            normal: Duration::from_millis(file.debounce_ms.normal),
            low: Duration::from_millis(file.debounce_ms.low),
        },
        tick_interval: Duration::from_millis(file.tick_interval_ms),
        remote: RemoteSettings { endpoint, table },
    })
}

pub fn save_auto_sync(config_dir: &Path, enabled: bool) -> Result<(), InfraError> {
    let path = config_dir.join(SYNC_JSON);
    let mut config = read_config(&path)?;
    let object = config.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig(format!("invalid object structure in {}", path.display()))
    })?;
    object.insert("autoSync".to_string(), serde_json::Value::Bool(enabled));

    let formatted = serde_json::to_string_pretty(&config)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}
