use std::sync::Arc;

use chrono::NaiveTime;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::calendar::{AlertMethod, CalendarId, CalendarStore, PermissionGate, ReminderDescriptor};
use crate::datetime::{Clock, minutes_since_midnight, time_from_minutes};
use crate::sync::event::build_events;
use crate::sync::lifecycle::{CalendarState, find_calendar, resolve_calendar};
use crate::sync::reminder::compute_reminder;
use crate::sync::{
    ConfigSource, DEFAULT_REMINDER_DAYS, DEFAULT_REMINDER_MINUTES, SyncConfig, SyncError,
    TaskSource,
};
use crate::task::Task;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Reminder placement used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSettings {
    pub margin_minutes: u32,
    pub time_of_day: NaiveTime,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            margin_minutes: DEFAULT_REMINDER_DAYS * MINUTES_PER_DAY,
            time_of_day: time_from_minutes(DEFAULT_REMINDER_MINUTES).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Sync is off; the calendar is absent (and was removed if it existed).
    Disabled,
    Synced(SyncReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub calendar_id: CalendarId,
    pub purged: usize,
    pub events: usize,
    pub reminders: usize,
}

/// One reconciliation engine per application, wired to its collaborators.
pub struct SyncEngine {
    store: Arc<dyn CalendarStore>,
    gate: Arc<dyn PermissionGate>,
    tasks: Arc<dyn TaskSource>,
    config: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    reminder: Mutex<ReminderSettings>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn CalendarStore>,
        gate: Arc<dyn PermissionGate>,
        tasks: Arc<dyn TaskSource>,
        config: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gate,
            tasks,
            config,
            clock,
            reminder: Mutex::new(ReminderSettings::default()),
        }
    }

    /// Sets the reminder margin in whole days. Read by the next run.
    pub fn set_reminder_margin(&self, days: u32) {
        self.reminder.lock().margin_minutes = days.saturating_mul(MINUTES_PER_DAY);
    }

    /// Sets the reminder time of day in minutes since midnight. Read by the
    /// next run; out-of-range values are ignored.
    pub fn set_reminder_time_of_day(&self, minutes: u32) {
        match time_from_minutes(minutes) {
            Some(time) => self.reminder.lock().time_of_day = time,
            None => warn!(minutes, "ignoring reminder time outside of a day"),
        }
    }

    pub fn reminder_settings(&self) -> ReminderSettings {
        *self.reminder.lock()
    }

    /// Where the owned calendar stands, without creating or removing it.
    pub fn calendar_state(&self) -> Result<CalendarState, SyncError> {
        let config = self.config.sync_config();
        let found = find_calendar(self.store.as_ref(), self.gate.as_ref(), &config)?;
        Ok(found.map_or(CalendarState::Absent, CalendarState::Present))
    }

    /// Runs one full reconciliation: resolve the calendar, purge its events,
    /// rebuild them from the current tasks.
    #[instrument(skip(self))]
    pub fn sync(&self) -> Result<SyncOutcome, SyncError> {
        debug!("syncing calendar");
        let config = self.config.sync_config();

        let calendar_id =
            match resolve_calendar(self.store.as_ref(), self.gate.as_ref(), &config)? {
                CalendarState::Absent => return Ok(SyncOutcome::Disabled),
                CalendarState::Present(id) => id,
            };

        self.set_reminder_margin(config.reminder_days);
        self.set_reminder_time_of_day(minutes_since_midnight(config.reminder_time));
        let settings = self.reminder_settings();

        let tasks = self.tasks.current_tasks().map_err(SyncError::Tasks)?;

        debug!(calendar_id, tasks = tasks.len(), "syncing due/threshold reminders");
        let purged = self
            .store
            .purge_events(calendar_id)
            .map_err(SyncError::Store)?;

        let report = self.insert_events(calendar_id, &tasks, &config, settings, purged)?;
        info!(
            calendar_id,
            purged = report.purged,
            events = report.events,
            reminders = report.reminders,
            "calendar synced"
        );
        Ok(SyncOutcome::Synced(report))
    }

    fn insert_events(
        &self,
        calendar_id: CalendarId,
        tasks: &[Task],
        config: &SyncConfig,
        settings: ReminderSettings,
        purged: usize,
    ) -> Result<SyncReport, SyncError> {
        let now = self.clock.now_local();
        let mut report = SyncReport {
            calendar_id,
            purged,
            events: 0,
            reminders: 0,
        };

        for task in tasks {
            for (kind, _, event) in build_events(calendar_id, task, config) {
                let event_id = self
                    .store
                    .insert_event(&event)
                    .map_err(SyncError::Store)?;
                report.events += 1;

                let Some(minutes) = compute_reminder(
                    event.start.naive_utc(),
                    settings.margin_minutes,
                    settings.time_of_day,
                    now,
                ) else {
                    debug!(event_id, ?kind, "reminder already passed; skipping");
                    continue;
                };

                self.store
                    .insert_reminder(&ReminderDescriptor {
                        event_id,
                        minutes,
                        method: AlertMethod::Alert,
                    })
                    .map_err(SyncError::Store)?;
                report.reminders += 1;
            }
        }

        Ok(report)
    }
}
