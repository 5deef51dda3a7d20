use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use duesync_core::calendar::{
    AccessLevel, CALENDAR_NAME, CalendarAttrs, CalendarData, CalendarId, CalendarStore,
    EventDescriptor, EventId, EventStatus, FileCalendarStore, FilePermission,
    MemoryCalendarStore, ReminderDescriptor, StaticPermission,
};
use duesync_core::datastore::DataStore;
use duesync_core::datetime::FixedClock;
use duesync_core::sync::{
    ConfigSource, SyncConfig, SyncEngine, SyncError, SyncOutcome, TaskSource,
};
use duesync_core::task::{Status, Task};
use parking_lot::Mutex;
use tempfile::tempdir;

/// Config that tests can flip between runs.
struct Switchable(Mutex<SyncConfig>);

impl Switchable {
    fn new(config: SyncConfig) -> Arc<Self> {
        Arc::new(Self(Mutex::new(config)))
    }

    fn set(&self, config: SyncConfig) {
        *self.0.lock() = config;
    }
}

impl ConfigSource for Switchable {
    fn sync_config(&self) -> SyncConfig {
        *self.0.lock()
    }
}

/// Memory store whose calls can be made to fail one kind at a time.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryCalendarStore,
    fail_delete: AtomicBool,
    fail_purge: AtomicBool,
    fail_insert: AtomicBool,
}

impl FaultyStore {
    fn check(flag: &AtomicBool, what: &str) -> anyhow::Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(anyhow!("{what} rejected by store"));
        }
        Ok(())
    }
}

impl CalendarStore for FaultyStore {
    fn find_calendar(&self, name: &str) -> anyhow::Result<Option<CalendarId>> {
        self.inner.find_calendar(name)
    }

    fn create_calendar(&self, attrs: &CalendarAttrs) -> anyhow::Result<()> {
        self.inner.create_calendar(attrs)
    }

    fn delete_calendar(&self, name: &str) -> anyhow::Result<usize> {
        Self::check(&self.fail_delete, "delete")?;
        self.inner.delete_calendar(name)
    }

    fn purge_events(&self, calendar_id: CalendarId) -> anyhow::Result<usize> {
        Self::check(&self.fail_purge, "purge")?;
        self.inner.purge_events(calendar_id)
    }

    fn insert_event(&self, event: &EventDescriptor) -> anyhow::Result<EventId> {
        Self::check(&self.fail_insert, "insert")?;
        self.inner.insert_event(event)
    }

    fn insert_reminder(&self, reminder: &ReminderDescriptor) -> anyhow::Result<()> {
        self.inner.insert_reminder(reminder)
    }
}

struct UnreadableTasks;

impl TaskSource for UnreadableTasks {
    fn current_tasks(&self) -> anyhow::Result<Vec<Task>> {
        Err(anyhow!("pending.data is locked"))
    }
}

fn write_task_lines(path: &Path, tasks: &[Task]) {
    let body: String = tasks
        .iter()
        .map(|task| serde_json::to_string(task).expect("task json") + "\n")
        .collect();
    std::fs::write(path, body).expect("write task file");
}

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 4, 1)
        .and_then(|date| date.and_hms_opt(9, 30, 0))
        .expect("now")
}

fn task(text: &str, due: Option<(u32, u32)>, threshold: Option<(u32, u32)>) -> Task {
    let entry = Utc.with_ymd_and_hms(2026, 3, 20, 8, 0, 0).single().expect("entry");
    let mut task = Task::new_pending(text.to_string(), entry);
    task.due = due.and_then(|(month, day)| NaiveDate::from_ymd_opt(2026, month, day));
    task.threshold =
        threshold.and_then(|(month, day)| NaiveDate::from_ymd_opt(2026, month, day));
    task
}

fn both_dates() -> SyncConfig {
    SyncConfig {
        sync_due: true,
        sync_threshold: true,
        ..SyncConfig::default()
    }
}

fn engine_with(
    store: Arc<dyn CalendarStore>,
    permitted: bool,
    tasks: Arc<dyn TaskSource>,
    config: Arc<dyn ConfigSource>,
) -> SyncEngine {
    SyncEngine::new(
        store,
        Arc::new(StaticPermission(permitted)),
        tasks,
        config,
        Arc::new(FixedClock(now())),
    )
}

fn owned_events(data: &CalendarData) -> Vec<(String, String)> {
    let id = data.find_calendar(CALENDAR_NAME).expect("owned calendar");
    let mut events: Vec<(String, String)> = data
        .events_of(id)
        .map(|stored| {
            (
                stored.event.start.format("%Y-%m-%d").to_string(),
                stored.event.title.clone(),
            )
        })
        .collect();
    events.sort();
    events
}

#[test]
fn repeated_runs_leave_the_same_calendar() {
    let store = Arc::new(MemoryCalendarStore::new());
    let tasks = vec![
        task("Pay rent", Some((4, 3)), None),
        task("File taxes", Some((4, 15)), Some((4, 10))),
    ];
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(tasks),
        Arc::new(both_dates()),
    );

    engine.sync().expect("first sync");
    let first = store.snapshot();
    let SyncOutcome::Synced(report) = engine.sync().expect("second sync") else {
        panic!("expected a synced run");
    };
    let second = store.snapshot();

    assert_eq!(report.purged, 3);
    assert_eq!(report.events, 3);
    assert_eq!(second.calendars.len(), 1);
    assert_eq!(owned_events(&first), owned_events(&second));
    assert_eq!(first.reminders.len(), second.reminders.len());
}

#[test]
fn dual_date_task_gets_two_events_with_one_title() {
    let store = Arc::new(MemoryCalendarStore::new());
    let mut taxes = task("File taxes", Some((4, 15)), Some((4, 10)));
    taxes.project = Some("admin".to_string());
    taxes.tags = vec!["money".to_string()];
    taxes.priority = Some("A".to_string());
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![taxes]),
        Arc::new(both_dates()),
    );

    engine.sync().expect("sync");
    let data = store.snapshot();
    assert_eq!(
        owned_events(&data),
        vec![
            (
                "2026-04-10".to_string(),
                "File taxes +admin @money".to_string()
            ),
            (
                "2026-04-15".to_string(),
                "File taxes +admin @money".to_string()
            ),
        ]
    );

    let descriptions: Vec<&str> = data
        .events
        .iter()
        .map(|stored| stored.event.description.as_str())
        .collect();
    assert!(descriptions.contains(&"Task is due (synced from duesync)"));
    assert!(descriptions.contains(&"Task threshold date (synced from duesync)"));
    assert!(data.events.iter().all(|stored| stored.event.all_day
        && stored.event.status == EventStatus::Confirmed
        && stored.event.app_uri == "duesync://search/File%20taxes%20%2Badmin%20%40money"));
}

#[test]
fn completed_tasks_drop_out_on_the_next_run() {
    let store = Arc::new(MemoryCalendarStore::new());
    let mut tasks = vec![task("Pay rent", Some((4, 3)), None), task("Book dentist", Some((4, 20)), None)];
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(tasks.clone()),
        Arc::new(both_dates()),
    );
    engine.sync().expect("sync");
    assert_eq!(store.snapshot().events.len(), 2);

    tasks[0].status = Status::Completed;
    tasks[0].end = Some(Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).single().expect("end"));
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(tasks),
        Arc::new(both_dates()),
    );
    engine.sync().expect("resync");

    let data = store.snapshot();
    assert_eq!(
        owned_events(&data),
        vec![("2026-04-20".to_string(), "Book dentist".to_string())]
    );
}

#[test]
fn disabling_sync_removes_calendar_and_events() {
    let store = Arc::new(MemoryCalendarStore::new());
    let config = Switchable::new(both_dates());
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        config.clone(),
    );
    engine.sync().expect("sync");
    assert_eq!(store.snapshot().events.len(), 1);

    config.set(SyncConfig::default());
    assert_eq!(engine.sync().expect("disabled sync"), SyncOutcome::Disabled);

    let data = store.snapshot();
    assert!(data.calendars.is_empty());
    assert!(data.events.is_empty());
    assert!(data.reminders.is_empty());
}

#[test]
fn denied_permission_touches_nothing() {
    let store = Arc::new(MemoryCalendarStore::new());
    let engine = engine_with(
        store.clone(),
        false,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        Arc::new(both_dates()),
    );

    assert!(matches!(engine.sync(), Err(SyncError::PermissionDenied)));
    assert_eq!(store.mutation_count(), 0);
    assert_eq!(store.query_count(), 0);
}

#[test]
fn write_only_store_fails_provisioning_and_cleans_up() {
    let store = Arc::new(MemoryCalendarStore::new());
    store.set_write_only(true);
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        Arc::new(both_dates()),
    );

    assert!(matches!(engine.sync(), Err(SyncError::ProvisioningFailure)));
    let data = store.snapshot();
    assert!(data.calendars.is_empty());
    assert!(data.events.is_empty());
}

#[test]
fn purge_leaves_other_calendars_alone() {
    let mut data = CalendarData::default();
    let foreign = data.create_calendar(&CalendarAttrs {
        name: "family".to_string(),
        access_level: AccessLevel::Owner,
        ..CalendarAttrs::owned()
    });
    let start = Utc.with_ymd_and_hms(2026, 4, 5, 0, 0, 0).single().expect("start");
    data.insert_event(&EventDescriptor {
        calendar_id: foreign,
        title: "Birthday".to_string(),
        start,
        end: start + chrono::Duration::hours(24),
        all_day: true,
        description: String::new(),
        timezone: "UTC".to_string(),
        status: EventStatus::Confirmed,
        has_attendee_data: false,
        app_id: String::new(),
        app_uri: String::new(),
    })
    .expect("foreign event");

    let store = Arc::new(MemoryCalendarStore::with_data(data));
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        Arc::new(both_dates()),
    );
    engine.sync().expect("sync");
    engine.sync().expect("resync");

    let data = store.snapshot();
    assert_eq!(data.calendars.len(), 2);
    let foreign_titles: Vec<&str> = data
        .events_of(foreign)
        .map(|stored| stored.event.title.as_str())
        .collect();
    assert_eq!(foreign_titles, vec!["Birthday"]);
    assert_eq!(owned_events(&data).len(), 1);
}

#[test]
fn datastore_feeds_file_backed_calendar() {
    let temp = tempdir().expect("tempdir");
    let tasks = DataStore::open(temp.path()).expect("open datastore");

    let mut deleted = task("Scrapped plan", Some((4, 8)), None);
    deleted.status = Status::Deleted;
    let mut done = task("Old chore", Some((4, 9)), None);
    done.status = Status::Completed;
    write_task_lines(&tasks.pending_path, &[task("Pay rent", Some((4, 3)), None), deleted]);
    write_task_lines(&tasks.completed_path, &[done]);

    let loaded = tasks.current_tasks().expect("current tasks");
    assert_eq!(loaded.len(), 2);

    let calendar_path = temp.path().join("cal").join("calendar.json");
    let store = Arc::new(FileCalendarStore::open(&calendar_path).expect("open calendar"));
    let engine = SyncEngine::new(
        store.clone(),
        Arc::new(FilePermission::for_store(&calendar_path)),
        Arc::new(tasks),
        Arc::new(both_dates()),
        Arc::new(FixedClock(now())),
    );

    let SyncOutcome::Synced(report) = engine.sync().expect("sync") else {
        panic!("expected a synced run");
    };
    assert_eq!(report.events, 1);
    assert_eq!(report.reminders, 1);

    let data = store.load().expect("reload calendar file");
    assert_eq!(
        owned_events(&data),
        vec![("2026-04-03".to_string(), "Pay rent".to_string())]
    );
    // Due 3 April, one day margin at noon: 2 April 12:00 is 720 minutes early.
    assert_eq!(data.reminders[0].minutes, 720);
}

#[test]
fn failing_delete_still_reports_disabled() {
    let store = Arc::new(FaultyStore::default());
    let config = Switchable::new(both_dates());
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        config.clone(),
    );
    engine.sync().expect("sync");

    store.fail_delete.store(true, Ordering::SeqCst);
    config.set(SyncConfig::default());
    assert_eq!(engine.sync().expect("disabled sync"), SyncOutcome::Disabled);
    assert_eq!(store.inner.snapshot().calendars.len(), 1);
}

#[test]
fn duplicate_owned_calendars_are_all_removed() {
    let mut data = CalendarData::default();
    data.create_calendar(&CalendarAttrs::owned());
    data.create_calendar(&CalendarAttrs::owned());
    let store = Arc::new(MemoryCalendarStore::with_data(data));
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(Vec::<Task>::new()),
        Arc::new(SyncConfig::default()),
    );

    assert_eq!(engine.sync().expect("disabled sync"), SyncOutcome::Disabled);
    assert!(store.snapshot().calendars.is_empty());
}

#[test]
fn failing_purge_ends_the_run_with_a_store_error() {
    let store = Arc::new(FaultyStore::default());
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        Arc::new(both_dates()),
    );
    engine.sync().expect("sync");

    store.fail_purge.store(true, Ordering::SeqCst);
    let err = engine.sync().expect_err("purge fails");
    assert!(matches!(err, SyncError::Store(_)));
    assert!(err.to_string().contains("purge rejected by store"));
    assert_eq!(store.inner.snapshot().events.len(), 1);
}

#[test]
fn failing_insert_ends_the_run_without_rollback() {
    let store = Arc::new(FaultyStore::default());
    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        Arc::new(both_dates()),
    );
    engine.sync().expect("sync");

    store.fail_insert.store(true, Ordering::SeqCst);
    assert!(matches!(engine.sync(), Err(SyncError::Store(_))));
    assert!(store.inner.snapshot().events.is_empty());

    store.fail_insert.store(false, Ordering::SeqCst);
    engine.sync().expect("next run rebuilds");
    assert_eq!(store.inner.snapshot().events.len(), 1);
}

#[test]
fn unreadable_tasks_keep_the_previous_events() {
    let store = Arc::new(MemoryCalendarStore::new());
    engine_with(
        store.clone(),
        true,
        Arc::new(vec![task("Pay rent", Some((4, 3)), None)]),
        Arc::new(both_dates()),
    )
    .sync()
    .expect("sync");

    let engine = engine_with(
        store.clone(),
        true,
        Arc::new(UnreadableTasks),
        Arc::new(both_dates()),
    );
    let err = engine.sync().expect_err("tasks unreadable");
    assert!(matches!(err, SyncError::Tasks(_)));
    assert_eq!(
        owned_events(&store.snapshot()),
        vec![("2026-04-03".to_string(), "Pay rent".to_string())]
    );
}
