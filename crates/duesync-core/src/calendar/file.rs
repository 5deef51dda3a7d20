use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use super::{
    CalendarAttrs, CalendarData, CalendarId, CalendarStore, EventDescriptor, EventId,
    PermissionGate, ReminderDescriptor,
};

/// Calendar store persisted as one JSON document.
#[derive(Debug)]
pub struct FileCalendarStore {
    pub path: PathBuf,
    guard: Mutex<()>,
}

impl FileCalendarStore {
    #[tracing::instrument(skip(path))]
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        info!(file = %path.display(), exists = path.exists(), "opened calendar store");
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    /// Reads the whole store; a missing file is an empty store.
    #[instrument(skip(self))]
    pub fn load(&self) -> anyhow::Result<CalendarData> {
        let _guard = self.guard.lock();
        load_data(&self.path)
    }

    fn update<T>(
        &self,
        op: impl FnOnce(&mut CalendarData) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let _guard = self.guard.lock();
        let mut data = load_data(&self.path)?;
        let out = op(&mut data)?;
        save_data_atomic(&self.path, &data)?;
        Ok(out)
    }
}

impl CalendarStore for FileCalendarStore {
    fn find_calendar(&self, name: &str) -> anyhow::Result<Option<CalendarId>> {
        Ok(self.load()?.find_calendar(name))
    }

    #[instrument(skip(self, attrs), fields(name = %attrs.name))]
    fn create_calendar(&self, attrs: &CalendarAttrs) -> anyhow::Result<()> {
        let id = self.update(|data| Ok(data.create_calendar(attrs)))?;
        debug!(id, "created calendar");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete_calendar(&self, name: &str) -> anyhow::Result<usize> {
        self.update(|data| Ok(data.delete_calendar(name)))
    }

    #[instrument(skip(self))]
    fn purge_events(&self, calendar_id: CalendarId) -> anyhow::Result<usize> {
        self.update(|data| Ok(data.purge_events(calendar_id)))
    }

    fn insert_event(&self, event: &EventDescriptor) -> anyhow::Result<EventId> {
        self.update(|data| data.insert_event(event))
    }

    fn insert_reminder(&self, reminder: &ReminderDescriptor) -> anyhow::Result<()> {
        self.update(|data| data.insert_reminder(reminder))
    }
}

/// Grants write access when the store's directory exists and is writable.
#[derive(Debug, Clone)]
pub struct FilePermission {
    dir: PathBuf,
}

impl FilePermission {
    pub fn for_store(path: &Path) -> Self {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { dir }
    }
}

impl PermissionGate for FilePermission {
    fn has_write_permission(&self) -> bool {
        match fs::metadata(&self.dir) {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(err) => {
                debug!(dir = %self.dir.display(), error = %err, "calendar directory not accessible");
                false
            }
        }
    }
}

fn load_data(path: &Path) -> anyhow::Result<CalendarData> {
    if !path.exists() {
        return Ok(CalendarData::default());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(CalendarData::default());
    }
    serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))
}

fn save_data_atomic(path: &Path, data: &CalendarData) -> anyhow::Result<()> {
    debug!(
        file = %path.display(),
        calendars = data.calendars.len(),
        events = data.events.len(),
        "saving calendar store atomically"
    );

    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, data)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::calendar::{APP_ID, AlertMethod, CALENDAR_NAME, EventStatus};

    #[test]
    fn store_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("cal").join("calendar.json");

        let store = FileCalendarStore::open(&path).expect("open");
        assert_eq!(store.find_calendar(CALENDAR_NAME).expect("find"), None);
        store
            .create_calendar(&CalendarAttrs::owned())
            .expect("create");
        let calendar_id = store
            .find_calendar(CALENDAR_NAME)
            .expect("find")
            .expect("calendar exists");

        let start = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().expect("start");
        let event_id = store
            .insert_event(&EventDescriptor {
                calendar_id,
                title: "Dentist".to_string(),
                start,
                end: start + Duration::hours(24),
                all_day: true,
                description: "due".to_string(),
                timezone: "UTC".to_string(),
                status: EventStatus::Confirmed,
                has_attendee_data: true,
                app_id: APP_ID.to_string(),
                app_uri: "duesync://search/Dentist".to_string(),
            })
            .expect("insert event");
        store
            .insert_reminder(&ReminderDescriptor {
                event_id,
                minutes: 720,
                method: AlertMethod::Alert,
            })
            .expect("insert reminder");

        let reopened = FileCalendarStore::open(&path).expect("reopen");
        let data = reopened.load().expect("load");
        assert_eq!(data.find_calendar(CALENDAR_NAME), Some(calendar_id));
        assert_eq!(data.events_of(calendar_id).count(), 1);
        assert_eq!(data.reminders_of(event_id).count(), 1);

        assert_eq!(reopened.purge_events(calendar_id).expect("purge"), 1);
        assert!(reopened.load().expect("load").reminders.is_empty());
    }

    #[test]
    fn permission_follows_directory_presence() {
        let temp = tempdir().expect("tempdir");
        let present = FilePermission::for_store(&temp.path().join("calendar.json"));
        assert!(present.has_write_permission());

        let missing = FilePermission::for_store(&temp.path().join("nope").join("calendar.json"));
        assert!(!missing.has_write_permission());
    }
}
