use chrono::{Duration, NaiveDate};

use crate::calendar::{APP_ID, CalendarId, EventDescriptor, EventStatus};
use crate::sync::SyncConfig;
use crate::task::{SUMMARY_TOKENS, Task};

const EVENT_TIMEZONE: &str = "UTC";
const APP_URI_SEARCH: &str = "duesync://search";

/// Which task date an event mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    Due,
    Threshold,
}

impl DateKind {
    pub fn description(self) -> &'static str {
        match self {
            DateKind::Due => "Task is due (synced from duesync)",
            DateKind::Threshold => "Task threshold date (synced from duesync)",
        }
    }
}

/// Builds the all-day event for `date`: midnight UTC to midnight UTC.
pub fn build_event(
    calendar_id: CalendarId,
    date: NaiveDate,
    title: &str,
    kind: DateKind,
) -> EventDescriptor {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    EventDescriptor {
        calendar_id,
        title: title.to_string(),
        start,
        end: start + Duration::hours(24),
        all_day: true,
        description: kind.description().to_string(),
        timezone: EVENT_TIMEZONE.to_string(),
        status: EventStatus::Confirmed,
        // Without it some calendar apps ignore the status.
        has_attendee_data: true,
        app_id: APP_ID.to_string(),
        app_uri: search_uri(title),
    }
}

/// Link that reopens the task list searching for `title`.
pub fn search_uri(title: &str) -> String {
    format!("{APP_URI_SEARCH}/{}", urlencoding::encode(title))
}

/// Events for one task under `config`: none for completed tasks, otherwise
/// one per enabled date kind the task carries.
pub fn build_events(
    calendar_id: CalendarId,
    task: &Task,
    config: &SyncConfig,
) -> Vec<(DateKind, NaiveDate, EventDescriptor)> {
    if task.is_completed() {
        return Vec::new();
    }

    let wanted = [
        (DateKind::Due, config.sync_due, task.due),
        (DateKind::Threshold, config.sync_threshold, task.threshold),
    ];

    let mut summary: Option<String> = None;
    let mut out = Vec::with_capacity(2);
    for (kind, enabled, date) in wanted {
        let Some(date) = date.filter(|_| enabled) else {
            continue;
        };
        let title = summary.get_or_insert_with(|| task.render(SUMMARY_TOKENS));
        out.push((kind, date, build_event(calendar_id, date, title, kind)));
    }
    out
}
