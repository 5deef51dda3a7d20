use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use parking_lot::RwLock;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::parse_time_of_day;
use crate::sync::{
  ConfigSource,
  DEFAULT_REMINDER_DAYS,
  SyncConfig
};

pub const KEY_SYNC_DUE: &str =
  "calendar.sync.due";
pub const KEY_SYNC_THRESHOLD: &str =
  "calendar.sync.threshold";
pub const KEY_REMINDER_DAYS: &str =
  "calendar.reminder.days";
pub const KEY_REMINDER_TIME: &str =
  "calendar.reminder.time";

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  pub fn defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    for (key, value) in [
      ("data.location", "~/.duesync"),
      (KEY_SYNC_DUE, "off"),
      (KEY_SYNC_THRESHOLD, "off"),
      (KEY_REMINDER_DAYS, "1"),
      (KEY_REMINDER_TIME, "720"),
      ("watch.interval", "2"),
      ("color", "on")
    ] {
      cfg
        .map
        .insert(key.to_string(), value.to_string());
    }

    cfg
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_u32(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u32>> {
    self
      .map
      .get(key)
      .map(|v| {
        v.trim().parse::<u32>().with_context(
          || {
            format!(
              "invalid number for \
               {key}: {v}"
            )
          }
        )
      })
      .transpose()
  }

  /// Sync settings from the
  /// `calendar.*` keys. Invalid
  /// reminder values fall back to
  /// their defaults with a warning.
  pub fn sync_config(&self) -> SyncConfig {
    let defaults = SyncConfig::default();

    let reminder_days = match self
      .get_u32(KEY_REMINDER_DAYS)
    {
      | Ok(days) => days
        .unwrap_or(DEFAULT_REMINDER_DAYS),
      | Err(err) => {
        warn!(error = %err, "using default reminder days");
        defaults.reminder_days
      }
    };

    let reminder_time = match self
      .get(KEY_REMINDER_TIME)
      .map(|raw| parse_time_of_day(&raw))
    {
      | Some(Ok(time)) => time,
      | Some(Err(err)) => {
        warn!(error = %err, "using default reminder time");
        defaults.reminder_time
      }
      | None => defaults.reminder_time
    };

    SyncConfig {
      sync_due: self
        .get_bool(KEY_SYNC_DUE)
        .unwrap_or(false),
      sync_threshold: self
        .get_bool(KEY_SYNC_THRESHOLD)
        .unwrap_or(false),
      reminder_days,
      reminder_time
    }
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Config that can be re-read while a
/// `watch` session runs. Command-line
/// overrides survive reloads.
#[derive(Debug)]
pub struct SharedConfig {
  rc_override: Option<PathBuf>,
  overrides:   Vec<(String, String)>,
  current:     RwLock<Config>
}

impl SharedConfig {
  pub fn new(
    rc_override: Option<PathBuf>,
    overrides: Vec<(String, String)>,
    current: Config
  ) -> Self {
    Self {
      rc_override,
      overrides,
      current: RwLock::new(current)
    }
  }

  pub fn snapshot(&self) -> Config {
    self.current.read().clone()
  }

  /// Re-reads the rc file. On failure
  /// the previous config stays active.
  #[tracing::instrument(skip(self))]
  pub fn reload(
    &self
  ) -> anyhow::Result<()> {
    let mut cfg = Config::load(
      self.rc_override.as_deref()
    )?;
    cfg.apply_overrides(
      self.overrides.iter().cloned()
    );
    *self.current.write() = cfg;
    info!("configuration reloaded");
    Ok(())
  }
}

impl ConfigSource for SharedConfig {
  fn sync_config(&self) -> SyncConfig {
    self.current.read().sync_config()
  }
}

impl ConfigSource for Config {
  fn sync_config(&self) -> SyncConfig {
    Config::sync_config(self)
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

/// Calendar store file:
/// `calendar.location`, else
/// `calendar.json` in the data
/// directory.
pub fn resolve_calendar_path(
  cfg: &Config,
  data_dir: &Path
) -> PathBuf {
  cfg
    .get("calendar.location")
    .filter(|value| {
      !value.trim().is_empty()
    })
    .map(|value| {
      expand_tilde(Path::new(
        value.trim()
      ))
    })
    .unwrap_or_else(|| {
      data_dir.join("calendar.json")
    })
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("DUESYNCRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate =
    home.join(".duesyncrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".duesync"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
