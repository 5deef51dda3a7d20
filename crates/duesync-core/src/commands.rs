use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::calendar::{CALENDAR_NAME, FileCalendarStore, FilePermission};
use crate::cli::Command;
use crate::config::{SharedConfig, resolve_calendar_path};
use crate::datastore::DataStore;
use crate::datetime::{Clock, resolve_clock};
use crate::render::Renderer;
use crate::sync::{CalendarState, SYNC_DELAY, SyncEngine, SyncOutcome, SyncScheduler};

const DEFAULT_WATCH_INTERVAL_SECS: u64 = 2;

/// Everything a command needs, wired once per invocation.
pub struct Session {
    pub tasks: Arc<DataStore>,
    pub config: Arc<SharedConfig>,
    pub calendar: Arc<FileCalendarStore>,
    pub clock: Arc<dyn Clock>,
    pub engine: Arc<SyncEngine>,
}

impl Session {
    #[instrument(skip_all)]
    pub fn open(tasks: DataStore, config: SharedConfig) -> anyhow::Result<Self> {
        let cfg = config.snapshot();
        let calendar_path = resolve_calendar_path(&cfg, &tasks.data_dir);
        let calendar = Arc::new(FileCalendarStore::open(&calendar_path).with_context(|| {
            format!("failed to open calendar store at {}", calendar_path.display())
        })?);
        let gate = Arc::new(FilePermission::for_store(&calendar_path));
        let clock = resolve_clock(cfg.get("calendar.timezone").as_deref());

        let tasks = Arc::new(tasks);
        let config = Arc::new(config);
        let engine = Arc::new(SyncEngine::new(
            calendar.clone(),
            gate,
            tasks.clone(),
            config.clone(),
            clock.clone(),
        ));

        Ok(Self {
            tasks,
            config,
            calendar,
            clock,
            engine,
        })
    }
}

pub fn dispatch(
    session: &Session,
    renderer: &mut Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let command = command.unwrap_or(Command::Sync);
    debug!(?command, "dispatching command");

    match command {
        Command::Sync => cmd_sync(session),
        Command::Watch { interval } => cmd_watch(session, interval),
        Command::Events => cmd_events(session, renderer),
        Command::Status => cmd_status(session, renderer),
    }
}

#[instrument(skip(session))]
fn cmd_sync(session: &Session) -> anyhow::Result<()> {
    match session.engine.sync()? {
        SyncOutcome::Disabled => {
            println!("Calendar sync is off; no calendar is kept.");
        }
        SyncOutcome::Synced(report) => {
            println!(
                "Synced {} event(s) with {} reminder(s) into calendar {} (replaced {}).",
                report.events, report.reminders, report.calendar_id, report.purged
            );
        }
    }
    Ok(())
}

#[instrument(skip(session))]
fn cmd_watch(session: &Session, interval: Option<u64>) -> anyhow::Result<()> {
    let interval = match interval {
        Some(secs) => secs,
        None => session
            .config
            .snapshot()
            .get_u32("watch.interval")?
            .map_or(DEFAULT_WATCH_INTERVAL_SECS, u64::from),
    };
    let interval = Duration::from_secs(interval.max(1));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(watch_loop(session, interval))
}

/// Modification times of everything a sync depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    tasks: Option<SystemTime>,
    rc_files: Vec<(PathBuf, Option<SystemTime>)>,
}

impl Fingerprint {
    fn take(session: &Session) -> Self {
        let rc_files = session
            .config
            .snapshot()
            .loaded_files
            .into_iter()
            .map(|path| {
                let modified = modified_at(&path);
                (path, modified)
            })
            .collect();

        Self {
            tasks: session.tasks.last_modified(),
            rc_files,
        }
    }

    fn rc_changed(&self) -> bool {
        self.rc_files
            .iter()
            .any(|(path, modified)| modified_at(path) != *modified)
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

async fn watch_loop(session: &Session, interval: Duration) -> anyhow::Result<()> {
    let scheduler = SyncScheduler::spawn(session.engine.clone(), SYNC_DELAY);
    info!(
        interval_secs = interval.as_secs(),
        data_dir = %session.tasks.data_dir.display(),
        "watching for task and config changes"
    );
    println!("Watching for changes; press Ctrl-C to stop.");

    scheduler.request_sync();
    let mut seen = Fingerprint::take(session);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!(error = %err, "failed to listen for ctrl-c; stopping");
                }
                info!("stopping watch");
                break;
            }
            _ = ticker.tick() => {
                if seen.rc_changed() {
                    match session.config.reload() {
                        Ok(()) => info!("rc file changed; configuration reloaded"),
                        Err(err) => warn!(error = %format!("{err:#}"), "keeping previous configuration"),
                    }
                }

                let current = Fingerprint::take(session);
                if current != seen {
                    debug!(?current, "change detected; requesting sync");
                    scheduler.request_sync();
                    seen = current;
                }
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}

#[instrument(skip(session, renderer))]
fn cmd_events(session: &Session, renderer: &mut Renderer) -> anyhow::Result<()> {
    let data = session.calendar.load()?;
    let Some(calendar_id) = data.find_calendar(CALENDAR_NAME) else {
        println!("No synced calendar.");
        return Ok(());
    };

    renderer.print_event_table(&data, calendar_id, session.clock.now_local())
}

#[instrument(skip(session, renderer))]
fn cmd_status(session: &Session, renderer: &mut Renderer) -> anyhow::Result<()> {
    let cfg = session.config.snapshot();
    let sync = cfg.sync_config();

    let calendar = match session.engine.calendar_state() {
        Ok(CalendarState::Present(id)) => format!("present (id {id})"),
        Ok(CalendarState::Absent) => "absent".to_string(),
        Err(err) => format!("unavailable: {err}"),
    };
    let on_off = |flag: bool| String::from(if flag { "on" } else { "off" });

    renderer.print_settings(vec![
        ("calendar".to_string(), calendar),
        (
            "calendar.location".to_string(),
            session.calendar.path.display().to_string(),
        ),
        (
            "data.location".to_string(),
            session.tasks.data_dir.display().to_string(),
        ),
        ("calendar.sync.due".to_string(), on_off(sync.sync_due)),
        (
            "calendar.sync.threshold".to_string(),
            on_off(sync.sync_threshold),
        ),
        (
            "calendar.reminder.days".to_string(),
            sync.reminder_days.to_string(),
        ),
        (
            "calendar.reminder.time".to_string(),
            sync.reminder_time.format("%H:%M").to_string(),
        ),
        (
            "now".to_string(),
            session.clock.now_local().format("%Y-%m-%d %H:%M").to_string(),
        ),
    ])
}
