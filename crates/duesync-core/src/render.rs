use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Duration, NaiveDateTime};
use tracing::warn;
use unicode_width::UnicodeWidthStr;

use crate::calendar::{CalendarData, CalendarId};
use crate::config::Config;

const REMINDER_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    /// Table of the events in `calendar_id`, oldest first, with the local
    /// time each reminder fires. Reminders already behind `now` are shown
    /// in red.
    #[tracing::instrument(skip(self, data, now))]
    pub fn print_event_table(
        &mut self,
        data: &CalendarData,
        calendar_id: CalendarId,
        now: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Date".to_string(),
            "Kind".to_string(),
            "Reminder".to_string(),
            "Title".to_string(),
        ];
        let rows = self.event_rows(data, calendar_id, now);

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    fn event_rows(
        &self,
        data: &CalendarData,
        calendar_id: CalendarId,
        now: NaiveDateTime,
    ) -> Vec<Vec<String>> {
        let mut events: Vec<_> = data.events_of(calendar_id).collect();
        events.sort_by_key(|stored| (stored.event.start, stored.id));

        let mut rows = Vec::with_capacity(events.len());
        for stored in events {
            let start = stored.event.start.naive_utc();
            let reminder = data
                .reminders_of(stored.id)
                .map(|reminder| {
                    let fires = Duration::try_minutes(reminder.minutes)
                        .and_then(|offset| start.checked_sub_signed(offset));
                    match fires {
                        Some(fires) if fires <= now => {
                            self.paint(&fires.format(REMINDER_FORMAT).to_string(), "31")
                        }
                        Some(fires) => fires.format(REMINDER_FORMAT).to_string(),
                        None => {
                            warn!(
                                event_id = stored.id,
                                minutes = reminder.minutes,
                                "reminder offset out of range"
                            );
                            self.paint("invalid", "31")
                        }
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");

            rows.push(vec![
                self.paint(&stored.id.to_string(), "33"),
                start.format("%Y-%m-%d").to_string(),
                stored.event.description.clone(),
                reminder,
                stored.event.title.clone(),
            ]);
        }
        rows
    }

    pub fn print_settings(&mut self, rows: Vec<(String, String)>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let width = rows
            .iter()
            .map(|(key, _)| UnicodeWidthStr::width(key.as_str()))
            .max()
            .unwrap_or(0);
        for (key, value) in rows {
            writeln!(out, "{key:width$}  {value}")?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
