//! Calendar store contract and the records that flow through it.
//!
//! The engine only ever talks to a [`CalendarStore`] through the six
//! operations below; [`memory::MemoryCalendarStore`] and
//! [`file::FileCalendarStore`] are the two implementations shipped here.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use file::{FileCalendarStore, FilePermission};
pub use memory::MemoryCalendarStore;

pub type CalendarId = i64;
pub type EventId = i64;

/// Name of the calendar owned by the sync engine. Unique per store.
pub const CALENDAR_NAME: &str = "duesync_reminders_v34SsjC7mwK9WSVI";
pub const ACCOUNT_NAME: &str = "duesync Calendar";
pub const ACCOUNT_TYPE: &str = "LOCAL";
pub const DISPLAY_NAME: &str = "duesync";
pub const CALENDAR_COLOR: u32 = 0xFF00_00FF;
pub const APP_ID: &str = "io.duesync";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    Read,
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarAttrs {
    pub account_name: String,
    pub account_type: String,
    pub name: String,
    pub display_name: String,
    pub color: u32,
    pub access_level: AccessLevel,
    pub owner_account: String,
    pub visible: bool,
    pub sync_events: bool,
}

impl CalendarAttrs {
    /// Attributes of the sync-owned calendar.
    pub fn owned() -> Self {
        Self {
            account_name: ACCOUNT_NAME.to_string(),
            account_type: ACCOUNT_TYPE.to_string(),
            name: CALENDAR_NAME.to_string(),
            display_name: DISPLAY_NAME.to_string(),
            color: CALENDAR_COLOR,
            access_level: AccessLevel::Read,
            owner_account: ACCOUNT_NAME.to_string(),
            visible: true,
            sync_events: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Tentative,
    Confirmed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDescriptor {
    pub calendar_id: CalendarId,
    pub title: String,
    pub start: DateTime<Utc>,
    /// Always set, all-day events included; reminders do not fire without it.
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub description: String,
    pub timezone: String,
    pub status: EventStatus,
    pub has_attendee_data: bool,
    pub app_id: String,
    pub app_uri: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertMethod {
    Default,
    Alert,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderDescriptor {
    pub event_id: EventId,
    /// Negative when the reminder falls after the event start.
    pub minutes: i64,
    pub method: AlertMethod,
}

/// Whether the process may write to the calendar store at all.
pub trait PermissionGate: Send + Sync {
    fn has_write_permission(&self) -> bool;
}

/// Fixed answer, for embedding and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl PermissionGate for StaticPermission {
    fn has_write_permission(&self) -> bool {
        self.0
    }
}

pub trait CalendarStore: Send + Sync {
    fn find_calendar(&self, name: &str) -> anyhow::Result<Option<CalendarId>>;

    fn create_calendar(&self, attrs: &CalendarAttrs) -> anyhow::Result<()>;

    /// Returns how many calendars matched `name` and were removed, together
    /// with their events and reminders.
    fn delete_calendar(&self, name: &str) -> anyhow::Result<usize>;

    /// Deletes every event of `calendar_id` and their reminders.
    fn purge_events(&self, calendar_id: CalendarId) -> anyhow::Result<usize>;

    fn insert_event(&self, event: &EventDescriptor) -> anyhow::Result<EventId>;

    fn insert_reminder(&self, reminder: &ReminderDescriptor) -> anyhow::Result<()>;
}

/// Plain contents of a calendar store, shared by both implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarData {
    #[serde(default)]
    pub calendars: Vec<StoredCalendar>,
    #[serde(default)]
    pub events: Vec<StoredEvent>,
    #[serde(default)]
    pub reminders: Vec<ReminderDescriptor>,
    #[serde(default)]
    next_calendar_id: CalendarId,
    #[serde(default)]
    next_event_id: EventId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCalendar {
    pub id: CalendarId,
    #[serde(flatten)]
    pub attrs: CalendarAttrs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub event: EventDescriptor,
}

impl CalendarData {
    pub fn find_calendar(&self, name: &str) -> Option<CalendarId> {
        self.calendars
            .iter()
            .find(|calendar| calendar.attrs.name == name)
            .map(|calendar| calendar.id)
    }

    pub fn create_calendar(&mut self, attrs: &CalendarAttrs) -> CalendarId {
        self.next_calendar_id += 1;
        let id = self.next_calendar_id;
        self.calendars.push(StoredCalendar {
            id,
            attrs: attrs.clone(),
        });
        id
    }

    pub fn delete_calendar(&mut self, name: &str) -> usize {
        let doomed: Vec<CalendarId> = self
            .calendars
            .iter()
            .filter(|calendar| calendar.attrs.name == name)
            .map(|calendar| calendar.id)
            .collect();
        self.calendars.retain(|calendar| calendar.attrs.name != name);
        for id in &doomed {
            self.purge_events(*id);
        }
        doomed.len()
    }

    pub fn purge_events(&mut self, calendar_id: CalendarId) -> usize {
        let doomed: Vec<EventId> = self
            .events
            .iter()
            .filter(|stored| stored.event.calendar_id == calendar_id)
            .map(|stored| stored.id)
            .collect();
        self.events
            .retain(|stored| stored.event.calendar_id != calendar_id);
        self.reminders
            .retain(|reminder| !doomed.contains(&reminder.event_id));
        doomed.len()
    }

    pub fn insert_event(&mut self, event: &EventDescriptor) -> anyhow::Result<EventId> {
        if !self
            .calendars
            .iter()
            .any(|calendar| calendar.id == event.calendar_id)
        {
            anyhow::bail!("no calendar with id {}", event.calendar_id);
        }
        self.next_event_id += 1;
        let id = self.next_event_id;
        self.events.push(StoredEvent {
            id,
            event: event.clone(),
        });
        Ok(id)
    }

    pub fn insert_reminder(&mut self, reminder: &ReminderDescriptor) -> anyhow::Result<()> {
        if !self.events.iter().any(|stored| stored.id == reminder.event_id) {
            anyhow::bail!("no event with id {}", reminder.event_id);
        }
        self.reminders.push(reminder.clone());
        Ok(())
    }

    pub fn events_of(&self, calendar_id: CalendarId) -> impl Iterator<Item = &StoredEvent> {
        self.events
            .iter()
            .filter(move |stored| stored.event.calendar_id == calendar_id)
    }

    pub fn reminders_of(&self, event_id: EventId) -> impl Iterator<Item = &ReminderDescriptor> {
        self.reminders
            .iter()
            .filter(move |reminder| reminder.event_id == event_id)
    }
}
