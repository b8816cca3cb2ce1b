use thiserror::Error;

/// Timer misuse. These are programming errors in the caller and are never retried.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer is already running")]
    AlreadyRunning,
    #[error("timer is not running")]
    NotRunning,
    #[error("timer is not paused")]
    NotPaused,
    #[error("pomodoro is not enabled for this item")]
    PomodoroDisabled,
}
