use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use tracing::{debug, info, instrument, trace};

use crate::sync::TaskSource;
use crate::task::{Status, Task};

const PENDING_FILE: &str = "pending.data";
const COMPLETED_FILE: &str = "completed.data";

/// Read side of the task list: one JSON task per line in `pending.data` and
/// `completed.data`. Another program owns writes; the sync only reads.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub pending_path: PathBuf,
    pub completed_path: PathBuf,
}

impl DataStore {
    /// Opens the task files in `data_dir`. Missing files read as empty.
    #[instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let store = Self {
            data_dir: data_dir.to_path_buf(),
            pending_path: data_dir.join(PENDING_FILE),
            completed_path: data_dir.join(COMPLETED_FILE),
        };
        info!(
            data_dir = %store.data_dir.display(),
            pending = store.pending_path.exists(),
            completed = store.completed_path.exists(),
            "opened task data"
        );
        Ok(store)
    }

    pub fn load_pending(&self) -> anyhow::Result<Vec<Task>> {
        read_task_lines(&self.pending_path)
    }

    pub fn load_completed(&self) -> anyhow::Result<Vec<Task>> {
        read_task_lines(&self.completed_path)
    }

    /// Newest modification time across the task files, for change polling.
    pub fn last_modified(&self) -> Option<SystemTime> {
        [&self.pending_path, &self.completed_path]
            .into_iter()
            .filter_map(|path| fs::metadata(path).and_then(|meta| meta.modified()).ok())
            .max()
    }
}

impl TaskSource for DataStore {
    /// Pending tasks in file order (deleted ones dropped), then completed.
    fn current_tasks(&self) -> anyhow::Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .load_pending()?
            .into_iter()
            .filter(|task| task.status != Status::Deleted)
            .collect();
        tasks.extend(self.load_completed()?);
        debug!(count = tasks.len(), "loaded task snapshot");
        Ok(tasks)
    }
}

#[instrument(skip(path), fields(file = %path.display()))]
fn read_task_lines(path: &Path) -> anyhow::Result<Vec<Task>> {
    if !path.exists() {
        trace!("task file missing; treating as empty");
        return Ok(Vec::new());
    }

    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let mut tasks = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let task: Task = serde_json::from_str(line.trim())
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        tasks.push(task);
    }
    Ok(tasks)
}
