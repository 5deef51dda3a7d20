use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};

use crate::sync::{SyncEngine, SyncError, SyncOutcome};

/// Quiet period between the last request and the run it triggers.
pub const SYNC_DELAY: Duration = Duration::from_millis(1000);

/// Work the scheduler runs once a burst of requests settles.
pub trait SyncJob: Send + Sync + 'static {
    fn run(&self) -> Result<SyncOutcome, SyncError>;
}

impl SyncJob for SyncEngine {
    fn run(&self) -> Result<SyncOutcome, SyncError> {
        self.sync()
    }
}

/// Debounces sync requests onto a single worker task.
///
/// Every request pushes the pending run back to `delay` after itself. Runs
/// never overlap: requests made during a run collapse into one run after it.
pub struct SyncScheduler {
    requests: mpsc::UnboundedSender<Instant>,
    worker: JoinHandle<()>,
}

impl SyncScheduler {
    /// Starts the worker. Must be called inside a tokio runtime.
    pub fn spawn(job: Arc<dyn SyncJob>, delay: Duration) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(worker_loop(job, rx, delay));
        Self { requests, worker }
    }

    /// Asks for a sync. Never blocks; safe from any thread.
    pub fn request_sync(&self) {
        if self.requests.send(Instant::now()).is_err() {
            warn!("sync worker is gone; dropping request");
        }
    }

    /// Stops accepting requests. A pending run starts right away; the call
    /// returns once the worker is done.
    pub async fn shutdown(self) {
        let Self { requests, worker } = self;
        drop(requests);
        if let Err(err) = worker.await {
            error!(error = %err, "sync worker ended abnormally");
        }
    }
}

async fn worker_loop(
    job: Arc<dyn SyncJob>,
    mut rx: mpsc::UnboundedReceiver<Instant>,
    delay: Duration,
) {
    debug!(delay_ms = delay.as_millis() as u64, "sync worker started");
    let mut open = true;

    while open {
        let Some(first) = rx.recv().await else {
            break;
        };
        let mut deadline = first + delay;

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(at) => deadline = deadline.max(at + delay),
                    None => {
                        debug!("request channel closed; flushing pending sync");
                        open = false;
                        break;
                    }
                },
                () = sleep_until(deadline) => break,
            }
        }

        run_job(job.clone()).await;
    }

    debug!("sync worker stopped");
}

async fn run_job(job: Arc<dyn SyncJob>) {
    match tokio::task::spawn_blocking(move || job.run()).await {
        Ok(Ok(SyncOutcome::Disabled)) => debug!("calendar sync disabled"),
        Ok(Ok(SyncOutcome::Synced(report))) => debug!(
            calendar_id = report.calendar_id,
            events = report.events,
            "sync run finished"
        ),
        Ok(Err(err @ (SyncError::PermissionDenied | SyncError::ProvisioningFailure))) => {
            warn!(error = %err, "calendar unavailable; sync skipped")
        }
        Ok(Err(err)) => error!(error = %err, "calendar sync failed"),
        Err(err) => error!(error = %err, "sync run panicked"),
    }
}
