use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_FOCUS_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
const MS_PER_MINUTE: u64 = 60_000;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_pomodoro_session: bool,
    #[serde(default)]
    pub is_break: bool,
}

impl Session {
    pub fn begin(start_time: DateTime<Utc>) -> Self {
        Self {
            id: next_id("session"),
            start_time,
            end_time: None,
            duration_ms: 0,
            description: None,
            is_pomodoro_session: false,
            is_break: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        if let Some(end_time) = self.end_time {
            if end_time < self.start_time {
                return Err("session.end_time must be >= session.start_time".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub status: TimerStatus,
    pub current_session: Option<Session>,
    pub elapsed_ms: u64,
}

/// Per-item focus/break configuration, read only when a phase is entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSettings {
    #[serde(default)]
    pub pomodoro_enabled: bool,
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_break_minutes")]
    pub break_minutes: u32,
}

fn default_focus_minutes() -> u32 {
    DEFAULT_FOCUS_MINUTES
}

fn default_break_minutes() -> u32 {
    DEFAULT_BREAK_MINUTES
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            pomodoro_enabled: false,
            focus_minutes: DEFAULT_FOCUS_MINUTES,
            break_minutes: DEFAULT_BREAK_MINUTES,
        }
    }
}

impl PomodoroSettings {
    pub fn enabled(focus_minutes: u32, break_minutes: u32) -> Self {
        Self {
            pomodoro_enabled: true,
            focus_minutes,
            break_minutes,
        }
    }

    pub fn focus_duration_ms(&self) -> u64 {
        u64::from(self.focus_minutes.max(1)) * MS_PER_MINUTE
    }

    pub fn break_duration_ms(&self) -> u64 {
        u64::from(self.break_minutes.max(1)) * MS_PER_MINUTE
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.focus_minutes == 0 {
            return Err("pomodoro.focus_minutes must be >= 1".to_string());
        }
        if self.break_minutes == 0 {
            return Err("pomodoro.break_minutes must be >= 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PomodoroMode {
    #[default]
    Off,
    On,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroPhase {
    pub mode: PomodoroMode,
    pub is_break: bool,
    pub time_left_ms: u64,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Online,
    Pomodoro,
    Manual,
    Session,
    Project,
    Category,
    Periodic,
}

impl SyncTrigger {
    pub fn default_priority(self) -> SyncPriority {
        match self {
            Self::Online | Self::Manual => SyncPriority::High,
            Self::Pomodoro | Self::Session | Self::Project | Self::Category => SyncPriority::Normal,
            Self::Periodic => SyncPriority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Pomodoro => "pomodoro",
            Self::Manual => "manual",
            Self::Session => "session",
            Self::Project => "project",
            Self::Category => "category",
            Self::Periodic => "periodic",
        }
    }
}

/// Lower values are more urgent; the derived ordering sorts `High` first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum SyncPriority {
    High = 1,
    Normal = 2,
    Low = 3,
}

impl SyncPriority {
    pub fn default_delay(self) -> Duration {
        match self {
            Self::High => Duration::from_secs(1),
            Self::Normal => Duration::from_secs(5),
            Self::Low => Duration::from_secs(30),
        }
    }
}

impl From<SyncPriority> for u8 {
    fn from(value: SyncPriority) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for SyncPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::High),
            2 => Ok(Self::Normal),
            3 => Ok(Self::Low),
            other => Err(format!("sync priority must be 1, 2 or 3, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: String,
    pub trigger: SyncTrigger,
    pub timestamp_ms: i64,
    pub priority: SyncPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending_count: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub is_online: bool,
    pub auto_sync_enabled: bool,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub total_time_ms: u64,
    #[serde(default)]
    pub pomodoro: PomodoroSettings,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl TrackedItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category_id: None,
            name: name.into(),
            total_time_ms: 0,
            pomodoro: PomodoroSettings::default(),
            sessions: Vec::new(),
            tasks: Vec::new(),
            notes: Vec::new(),
        }
    }
}

/// Whole application state exchanged with the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub items: Vec<TrackedItem>,
}

impl Snapshot {
    pub fn item(&self, item_id: &str) -> Option<&TrackedItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut TrackedItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    /// Returns `false` when the item does not exist.
    pub fn append_session(&mut self, item_id: &str, session: Session) -> bool {
        let Some(item) = self.item_mut(item_id) else {
            return false;
        };
        if !session.is_pomodoro_session && !session.is_break {
            item.total_time_ms = item.total_time_ms.saturating_add(session.duration_ms);
        }
        item.sessions.push(session);
        true
    }
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}
