//! Keeps the owned calendar in step with the task list.
//!
//! Every run resolves the calendar, purges all of its events and rebuilds
//! them from the current tasks. [`scheduler::SyncScheduler`] debounces the
//! triggers so bursts of changes cost one run.

pub mod engine;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod reminder;
pub mod scheduler;

use chrono::NaiveTime;

use crate::task::Task;

pub use engine::{ReminderSettings, SyncEngine, SyncOutcome, SyncReport};
pub use error::SyncError;
pub use lifecycle::CalendarState;
pub use scheduler::{SYNC_DELAY, SyncJob, SyncScheduler};

pub const DEFAULT_REMINDER_DAYS: u32 = 1;
pub const DEFAULT_REMINDER_MINUTES: u32 = 12 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub sync_due: bool,
    pub sync_threshold: bool,
    pub reminder_days: u32,
    pub reminder_time: NaiveTime,
}

impl SyncConfig {
    pub fn enabled(&self) -> bool {
        self.sync_due || self.sync_threshold
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_due: false,
            sync_threshold: false,
            reminder_days: DEFAULT_REMINDER_DAYS,
            reminder_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// The task list the calendar mirrors.
pub trait TaskSource: Send + Sync {
    fn current_tasks(&self) -> anyhow::Result<Vec<Task>>;
}

/// Sync settings, read fresh at the start of every run.
pub trait ConfigSource: Send + Sync {
    fn sync_config(&self) -> SyncConfig;
}

impl ConfigSource for SyncConfig {
    fn sync_config(&self) -> SyncConfig {
        *self
    }
}

impl TaskSource for Vec<Task> {
    fn current_tasks(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self.clone())
    }
}
