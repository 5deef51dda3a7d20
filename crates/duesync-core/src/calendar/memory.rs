use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::{
    CalendarAttrs, CalendarData, CalendarId, CalendarStore, EventDescriptor, EventId,
    ReminderDescriptor,
};

/// Calendar store held in process memory.
///
/// With `write_only` set, calendars can still be created and deleted but
/// queries never see them, the way a restrictive privacy guard behaves.
#[derive(Debug, Default)]
pub struct MemoryCalendarStore {
    data: Mutex<CalendarData>,
    write_only: AtomicBool,
    queries: AtomicUsize,
    mutations: AtomicUsize,
}

impl MemoryCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: CalendarData) -> Self {
        Self {
            data: Mutex::new(data),
            ..Self::default()
        }
    }

    pub fn set_write_only(&self, write_only: bool) {
        self.write_only.store(write_only, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> CalendarData {
        self.data.lock().clone()
    }

    /// Number of calls that could have changed the store.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn note_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl CalendarStore for MemoryCalendarStore {
    fn find_calendar(&self, name: &str) -> anyhow::Result<Option<CalendarId>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.write_only.load(Ordering::SeqCst) {
            debug!(name, "write-only store hides calendars");
            return Ok(None);
        }
        Ok(self.data.lock().find_calendar(name))
    }

    #[instrument(skip(self, attrs), fields(name = %attrs.name))]
    fn create_calendar(&self, attrs: &CalendarAttrs) -> anyhow::Result<()> {
        self.note_mutation();
        let id = self.data.lock().create_calendar(attrs);
        debug!(id, "created calendar in memory");
        Ok(())
    }

    fn delete_calendar(&self, name: &str) -> anyhow::Result<usize> {
        self.note_mutation();
        Ok(self.data.lock().delete_calendar(name))
    }

    fn purge_events(&self, calendar_id: CalendarId) -> anyhow::Result<usize> {
        self.note_mutation();
        Ok(self.data.lock().purge_events(calendar_id))
    }

    fn insert_event(&self, event: &EventDescriptor) -> anyhow::Result<EventId> {
        self.note_mutation();
        self.data.lock().insert_event(event)
    }

    fn insert_reminder(&self, reminder: &ReminderDescriptor) -> anyhow::Result<()> {
        self.note_mutation();
        self.data.lock().insert_reminder(reminder)
    }
}
