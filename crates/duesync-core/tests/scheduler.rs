use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use duesync_core::sync::{SYNC_DELAY, SyncError, SyncJob, SyncOutcome, SyncScheduler};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, timeout};

/// Job that reports each run and behaves per a scripted list of steps.
struct ScriptedJob {
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    started: mpsc::UnboundedSender<usize>,
    script: Mutex<Vec<Step>>,
}

enum Step {
    Fail,
    Panic,
    Block(std::sync::mpsc::Receiver<()>),
}

impl ScriptedJob {
    fn new(script: Vec<Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
        let (started, rx) = mpsc::unbounded_channel();
        let job = Arc::new(Self {
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            started,
            script: Mutex::new(script.into_iter().rev().collect()),
        });
        (job, rx)
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl SyncJob for ScriptedJob {
    fn run(&self) -> Result<SyncOutcome, SyncError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _ = self.started.send(run);

        let step = self.script.lock().pop();
        let result = match step {
            Some(Step::Fail) => Err(SyncError::Store(anyhow::anyhow!("store offline"))),
            Some(Step::Panic) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                panic!("job blew up");
            }
            Some(Step::Block(gate)) => {
                let _ = gate.recv_timeout(Duration::from_secs(5));
                Ok(SyncOutcome::Disabled)
            }
            None => Ok(SyncOutcome::Disabled),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_requests_runs_once_after_the_last() {
    let (job, mut started) = ScriptedJob::new(vec![]);
    let scheduler = SyncScheduler::spawn(job.clone(), SYNC_DELAY);

    scheduler.request_sync();
    for _ in 0..4 {
        time::sleep(Duration::from_millis(100)).await;
        scheduler.request_sync();
    }
    let last = Instant::now();

    assert_eq!(started.recv().await, Some(1));
    assert!(last.elapsed() >= SYNC_DELAY);

    assert!(
        timeout(Duration::from_secs(10), started.recv())
            .await
            .is_err()
    );
    scheduler.shutdown().await;
    assert_eq!(job.runs(), 1);
}

#[tokio::test(start_paused = true)]
async fn spaced_requests_each_get_a_run() {
    let (job, mut started) = ScriptedJob::new(vec![]);
    let scheduler = SyncScheduler::spawn(job.clone(), SYNC_DELAY);

    scheduler.request_sync();
    assert_eq!(started.recv().await, Some(1));
    time::sleep(Duration::from_secs(3)).await;
    scheduler.request_sync();
    assert_eq!(started.recv().await, Some(2));

    scheduler.shutdown().await;
    assert_eq!(job.runs(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_during_a_run_collapse_into_one_follow_up() {
    let (release, gate) = std::sync::mpsc::channel();
    let (job, mut started) = ScriptedJob::new(vec![Step::Block(gate)]);
    let scheduler = SyncScheduler::spawn(job.clone(), Duration::from_millis(20));

    scheduler.request_sync();
    let first = timeout(Duration::from_secs(5), started.recv()).await;
    assert_eq!(first.expect("first run starts"), Some(1));

    for _ in 0..3 {
        scheduler.request_sync();
        time::sleep(Duration::from_millis(5)).await;
    }
    release.send(()).expect("release first run");

    let second = timeout(Duration::from_secs(5), started.recv()).await;
    assert_eq!(second.expect("follow-up run starts"), Some(2));
    assert!(
        timeout(Duration::from_millis(200), started.recv())
            .await
            .is_err()
    );

    scheduler.shutdown().await;
    assert_eq!(job.runs(), 2);
    assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_run_does_not_stop_the_worker() {
    let (job, mut started) = ScriptedJob::new(vec![Step::Fail]);
    let scheduler = SyncScheduler::spawn(job.clone(), SYNC_DELAY);

    scheduler.request_sync();
    assert_eq!(started.recv().await, Some(1));
    time::sleep(Duration::from_secs(2)).await;

    scheduler.request_sync();
    assert_eq!(started.recv().await, Some(2));
    scheduler.shutdown().await;
    assert_eq!(job.runs(), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_run_does_not_stop_the_worker() {
    let (job, mut started) = ScriptedJob::new(vec![Step::Panic]);
    let scheduler = SyncScheduler::spawn(job.clone(), SYNC_DELAY);

    scheduler.request_sync();
    assert_eq!(started.recv().await, Some(1));
    time::sleep(Duration::from_secs(2)).await;

    scheduler.request_sync();
    assert_eq!(started.recv().await, Some(2));
    scheduler.shutdown().await;
    assert_eq!(job.runs(), 2);
}
