use std::sync::{
  Arc,
  OnceLock
};

use anyhow::anyhow;
use chrono::{
  DateTime,
  Local,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Utc
};
use chrono_tz::Tz;
use parking_lot::RwLock;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str =
  "DUESYNC_TIMEZONE";

/// Zone task timestamps are read in.
/// `None` means the system local zone.
static TASK_TIMEZONE: RwLock<
  Option<Tz>
> = RwLock::new(None);

pub fn task_timezone() -> Option<Tz> {
  *TASK_TIMEZONE.read()
}

fn set_task_timezone(tz: Option<Tz>) {
  *TASK_TIMEZONE.write() = tz;
}

/// Calendar date of `dt` in `zone`,
/// or in the system local zone.
#[must_use]
pub fn to_task_date(
  dt: DateTime<Utc>,
  zone: Option<Tz>
) -> NaiveDate {
  match zone {
    | Some(tz) => {
      dt.with_timezone(&tz).date_naive()
    }
    | None => {
      dt.with_timezone(&Local)
        .date_naive()
    }
  }
}

/// Source of the local wall-clock
/// time used for reminder checks.
pub trait Clock: Send + Sync {
  fn now_local(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_local(&self) -> NaiveDateTime {
    Local::now().naive_local()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct ZonedClock(pub Tz);

impl Clock for ZonedClock {
  fn now_local(&self) -> NaiveDateTime {
    Utc::now()
      .with_timezone(&self.0)
      .naive_local()
  }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(
  pub NaiveDateTime
);

impl Clock for FixedClock {
  fn now_local(&self) -> NaiveDateTime {
    self.0
  }
}

/// Picks the clock for reminder
/// checks: `$DUESYNC_TIMEZONE`, then
/// the configured zone, then the
/// system local zone. Task timestamps
/// are read in the same zone from then
/// on.
pub fn resolve_clock(
  configured: Option<&str>
) -> Arc<dyn Clock> {
  let zone = std::env::var(
    TIMEZONE_ENV_VAR
  )
  .ok()
  .and_then(|raw| {
    parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  })
  .or_else(|| {
    configured.and_then(|raw| {
      parse_timezone(
        raw,
        "calendar.timezone"
      )
    })
  });
  set_task_timezone(zone);

  match zone {
    | Some(tz) => {
      Arc::new(ZonedClock(tz))
    }
    | None => {
      tracing::debug!(
        "no timezone configured; \
         using system local time"
      );
      Arc::new(SystemClock)
    }
  }
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured reminder timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Converts minutes since midnight
/// into a time of day.
#[must_use]
pub fn time_from_minutes(
  minutes: u32
) -> Option<NaiveTime> {
  NaiveTime::from_hms_opt(
    minutes / 60,
    minutes % 60,
    0
  )
}

#[must_use]
pub fn minutes_since_midnight(
  time: NaiveTime
) -> u32 {
  use chrono::Timelike;
  time.hour() * 60 + time.minute()
}

/// Parses a reminder time of day:
/// either minutes since midnight
/// (`720`) or a clock time (`12:00`,
/// `9:30am`).
pub fn parse_time_of_day(
  input: &str
) -> anyhow::Result<NaiveTime> {
  let token = input.trim();
  if !token.is_empty()
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let minutes: u32 =
      token.parse().map_err(|_| {
        anyhow!(
          "invalid minutes value: \
           {token}"
        )
      })?;
    return time_from_minutes(minutes)
      .ok_or_else(|| {
        anyhow!(
          "minutes since midnight out \
           of range: {minutes}"
        )
      });
  }

  let (hour, minute) =
    parse_clock_time(token)
      .ok_or_else(|| {
        anyhow!(
          "invalid time of day: \
           {token}"
        )
      })?;
  NaiveTime::from_hms_opt(
    hour, minute, 0
  )
  .ok_or_else(|| {
    anyhow!(
      "invalid time of day: {token}"
    )
  })
}

fn clock_regex() -> Option<&'static Regex>
{
  static CLOCK_RE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  CLOCK_RE
    .get_or_init(|| {
      Regex::new(
        r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
      )
      .ok()
    })
    .as_ref()
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let captures =
    clock_regex()?.captures(token)?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm_match
      .as_str()
      .to_ascii_lowercase()
      .as_str()
    {
      | "am" => raw_hour % 12,
      | "pm" => raw_hour % 12 + 12,
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  Some((hour, minute))
}

/// Serde for calendar dates on tasks.
/// Writes `YYYY-MM-DD`; also reads
/// Taskwarrior timestamps
/// (`YYYYMMDDTHHMMSSZ`), taking the
/// date they fall on in the task zone.
pub mod task_date_serde {
  use chrono::{
    NaiveDate,
    NaiveDateTime
  };
  use chrono_tz::Tz;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub(crate) fn parse(
    raw: &str
  ) -> Result<NaiveDate, String> {
    parse_in(
      raw,
      super::task_timezone()
    )
  }

  pub(crate) fn parse_in(
    raw: &str,
    zone: Option<Tz>
  ) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    if let Ok(date) =
      NaiveDate::parse_from_str(
        trimmed, "%Y-%m-%d"
      )
    {
      return Ok(date);
    }
    NaiveDateTime::parse_from_str(
      trimmed,
      "%Y%m%dT%H%M%SZ"
    )
    .map(|dt| {
      super::to_task_date(
        dt.and_utc(),
        zone
      )
    })
    .map_err(|err| {
      format!(
        "invalid task date \
         {trimmed:?}: {err}"
      )
    })
  }

  pub mod option {
    use super::*;

    pub fn serialize<S>(
      date: &Option<NaiveDate>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match date {
        | Some(value) => {
          serializer.serialize_some(
            &value
              .format("%Y-%m-%d")
              .to_string()
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<Option<NaiveDate>, D::Error>
    where
      D: Deserializer<'de>
    {
      let raw =
        Option::<String>::deserialize(
          deserializer
        )?;
      match raw {
        | Some(value)
          if !value.trim().is_empty() =>
        {
          parse(&value)
            .map(Some)
            .map_err(
              serde::de::Error::custom
            )
        }
        | _ => Ok(None)
      }
    }
  }
}

/// Taskwarrior-style timestamps
/// (`YYYYMMDDTHHMMSSZ`).
pub mod timestamp_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  const FORMAT: &str =
    "%Y%m%dT%H%M%SZ";

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.format(FORMAT).to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    NaiveDateTime::parse_from_str(
      &raw, FORMAT
    )
    .map(|ndt| ndt.and_utc())
    .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use super::*;

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          serializer.serialize_some(
            &value
              .format(FORMAT)
              .to_string()
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let raw =
        Option::<String>::deserialize(
          deserializer
        )?;
      match raw {
        | Some(value) => {
          NaiveDateTime::parse_from_str(
            &value, FORMAT
          )
          .map(|ndt| Some(ndt.and_utc()))
          .map_err(
            serde::de::Error::custom
          )
        }
        | None => Ok(None)
      }
    }
  }
}
