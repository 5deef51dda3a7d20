use chrono::{Duration, NaiveDateTime, NaiveTime};

/// Minutes before `event_start` at which the reminder should fire, or `None`
/// when that moment is not in the future.
///
/// The reminder moment is `event_start` moved back by `margin_minutes`, with
/// its time of day replaced by `time_of_day`. All values are local wall-clock
/// times. The check happens once, when the event is inserted.
pub fn compute_reminder(
    event_start: NaiveDateTime,
    margin_minutes: u32,
    time_of_day: NaiveTime,
    now: NaiveDateTime,
) -> Option<i64> {
    let shifted = event_start.checked_sub_signed(Duration::minutes(i64::from(margin_minutes)))?;
    let remind_at = shifted.date().and_time(time_of_day);
    if remind_at > now {
        Some((event_start - remind_at).num_minutes())
    } else {
        None
    }
}
