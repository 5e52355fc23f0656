//! Bounded background job scheduler.
//!
//! A pool of OS threads pulls jobs from one shared FIFO queue. Control is
//! coarse and cooperative:
//! - pause/resume flip one global gate that workers wait on before taking
//!   a job and that handlers wait on at their checkpoints
//! - cancel marks every running or paused job CANCELED; handlers notice at
//!   their next checkpoint
//! - the pool grows by spawning threads and shrinks by handing out retire
//!   tokens that idle workers claim after finishing their current job
//!
//! Handler errors and panics are recorded on the job; the worker survives.

use crate::error::{KeeperError, Result};
use crate::job::{Job, JobStatus, JobType};
use crate::progress::Checkpoint;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound for the worker pool.
pub const MAX_WORKERS: usize = 8;

/// How long idle workers and paused checkpoints sleep between re-checks.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub type JobHandler = Arc<dyn Fn(&JobContext) -> Result<()> + Send + Sync>;

/// Receives job state changes. Called on worker threads.
pub trait JobObserver: Send + Sync {
    /// Queued, started, paused, resumed, canceled or progressed.
    fn on_job_updated(&self, job: &Job);

    /// Reached a terminal state.
    fn on_job_completed(&self, _job: &Job) {}
}

/// A job state change delivered through `Scheduler::subscribe`.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Updated(Job),
    Completed(Job),
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Updated(job) | JobEvent::Completed(job) => job,
        }
    }
}

struct ChannelObserver {
    tx: Sender<JobEvent>,
}

impl JobObserver for ChannelObserver {
    fn on_job_updated(&self, job: &Job) {
        let _ = self.tx.send(JobEvent::Updated(job.clone()));
    }

    fn on_job_completed(&self, job: &Job) {
        let _ = self.tx.send(JobEvent::Completed(job.clone()));
    }
}

/// Shared, lockable job record.
struct JobCell {
    job: Mutex<Job>,
}

impl JobCell {
    fn snapshot(&self) -> Job {
        self.job.lock().clone()
    }

    fn status(&self) -> JobStatus {
        self.job.lock().status
    }

    /// Apply a state transition if the state machine allows it.
    fn transition(&self, next: JobStatus) -> Option<Job> {
        let mut job = self.job.lock();
        if !job.status.can_transition_to(next) {
            return None;
        }
        job.status = next;
        match next {
            JobStatus::Running if job.started_at.is_none() => job.started_at = Some(Utc::now()),
            JobStatus::Completed => {
                job.progress = 100;
                job.finished_at = Some(Utc::now());
            }
            JobStatus::Failed | JobStatus::Canceled => job.finished_at = Some(Utc::now()),
            _ => {}
        }
        Some(job.clone())
    }

    fn fail(&self, message: String) -> Option<Job> {
        let mut job = self.job.lock();
        if !job.status.can_transition_to(JobStatus::Failed) {
            return None;
        }
        job.status = JobStatus::Failed;
        job.error = Some(message);
        job.finished_at = Some(Utc::now());
        Some(job.clone())
    }
}

struct Shared {
    queue_tx: Sender<Arc<JobCell>>,
    queue_rx: Receiver<Arc<JobCell>>,
    handlers: RwLock<HashMap<JobType, JobHandler>>,
    running: Mutex<HashMap<Uuid, Arc<JobCell>>>,
    paused: Mutex<bool>,
    resumed: Condvar,
    observers: RwLock<Vec<Arc<dyn JobObserver>>>,
    retire: AtomicUsize,
    stopping: AtomicBool,
    target_workers: AtomicUsize,
    // Dequeued jobs a worker is holding at the closed gate.
    held: AtomicUsize,
}

impl Shared {
    fn notify_updated(&self, job: &Job) {
        for observer in self.observers.read().iter() {
            observer.on_job_updated(job);
        }
    }

    fn notify_completed(&self, job: &Job) {
        for observer in self.observers.read().iter() {
            observer.on_job_completed(job);
        }
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// Block while paused, up to one poll interval. Returns whether the
    /// gate is open.
    fn wait_for_gate(&self) -> bool {
        let mut paused = self.paused.lock();
        if *paused {
            self.resumed.wait_for(&mut paused, POLL_INTERVAL);
        }
        !*paused
    }

    fn try_retire(&self) -> bool {
        self.retire
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Handed to a handler for the duration of one job.
pub struct JobContext {
    cell: Arc<JobCell>,
    shared: Arc<Shared>,
    payload: Value,
    id: Uuid,
    job_type: JobType,
}

impl JobContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserialize the payload into a typed input.
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            KeeperError::InvalidArgument(format!("bad {} payload: {}", self.job_type, e))
        })
    }

    pub fn is_canceled(&self) -> bool {
        self.cell.status() == JobStatus::Canceled
    }

    /// Cooperative gate. Blocks while the scheduler is paused and returns
    /// false once the job has been canceled.
    pub fn checkpoint(&self) -> bool {
        loop {
            if self.is_canceled() {
                return false;
            }
            if self.shared.wait_for_gate() {
                return !self.is_canceled();
            }
        }
    }

    pub fn set_progress(&self, percent: u8) {
        let snapshot = {
            let mut job = self.cell.job.lock();
            let percent = percent.min(100);
            if job.status.is_terminal() || job.progress == percent {
                return;
            }
            job.progress = percent;
            job.clone()
        };
        self.shared.notify_updated(&snapshot);
    }

    /// Record the handler's output summary on the job.
    pub fn set_result(&self, result: Value) {
        self.cell.job.lock().result = Some(result);
    }
}

impl Checkpoint for JobContext {
    fn proceed(&self) -> bool {
        self.checkpoint()
    }

    fn report(&self, percent: u8) {
        self.set_progress(percent);
    }
}

/// Fixed-size worker pool over a FIFO job queue.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start a scheduler with `worker_count` workers (clamped to
    /// `1..=MAX_WORKERS`).
    pub fn new(worker_count: usize) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        let scheduler = Scheduler {
            shared: Arc::new(Shared {
                queue_tx,
                queue_rx,
                handlers: RwLock::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                paused: Mutex::new(false),
                resumed: Condvar::new(),
                observers: RwLock::new(Vec::new()),
                retire: AtomicUsize::new(0),
                stopping: AtomicBool::new(false),
                target_workers: AtomicUsize::new(0),
                held: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        };
        scheduler.set_worker_count(worker_count);
        scheduler
    }

    /// Associate the handler for a job type, replacing any previous one.
    pub fn register_handler<F>(&self, job_type: JobType, handler: F)
    where
        F: Fn(&JobContext) -> Result<()> + Send + Sync + 'static,
    {
        self.shared
            .handlers
            .write()
            .insert(job_type, Arc::new(handler));
    }

    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.shared.observers.write().push(observer);
    }

    /// Channel of every job event from now on.
    pub fn subscribe(&self) -> Receiver<JobEvent> {
        let (tx, rx) = unbounded();
        self.add_observer(Arc::new(ChannelObserver { tx }));
        rx
    }

    /// Queue a job; observers see it in the QUEUED state immediately.
    /// Returns the job id.
    pub fn enqueue(&self, mut job: Job) -> Uuid {
        job.status = JobStatus::Queued;
        let id = job.id;
        let snapshot = job.clone();
        let cell = Arc::new(JobCell {
            job: Mutex::new(job),
        });
        debug!(job_id = %id, job_type = %snapshot.job_type, "job queued");
        self.shared.notify_updated(&snapshot);
        if self.shared.queue_tx.send(cell).is_err() {
            warn!(job_id = %id, "job queue closed, job dropped");
        }
        id
    }

    /// Jobs currently held by a worker.
    pub fn running_jobs(&self) -> Vec<Job> {
        self.shared
            .running
            .lock()
            .values()
            .map(|cell| cell.snapshot())
            .collect()
    }

    /// Jobs not yet started, including any a worker holds while paused.
    pub fn queued_len(&self) -> usize {
        self.shared.queue_rx.len() + self.shared.held.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Close the global gate and mark every running job PAUSED.
    pub fn pause_all(&self) {
        *self.shared.paused.lock() = true;
        self.retag_running(JobStatus::Running, JobStatus::Paused);
        info!("scheduler paused");
    }

    /// Open the gate and mark every paused job RUNNING again.
    pub fn resume_all(&self) {
        *self.shared.paused.lock() = false;
        self.retag_running(JobStatus::Paused, JobStatus::Running);
        self.shared.resumed.notify_all();
        info!("scheduler resumed");
    }

    /// Mark every running or paused job CANCELED and reopen the gate so
    /// blocked handlers can observe it.
    pub fn cancel_all(&self) {
        let cells: Vec<_> = self.shared.running.lock().values().cloned().collect();
        for cell in cells {
            if let Some(job) = cell.transition(JobStatus::Canceled) {
                info!(job_id = %job.id, "job canceled");
                self.shared.notify_updated(&job);
            }
        }
        *self.shared.paused.lock() = false;
        self.shared.resumed.notify_all();
    }

    fn retag_running(&self, from: JobStatus, to: JobStatus) {
        let cells: Vec<_> = self.shared.running.lock().values().cloned().collect();
        for cell in cells {
            if cell.status() != from {
                continue;
            }
            if let Some(job) = cell.transition(to) {
                self.shared.notify_updated(&job);
            }
        }
    }

    /// Current target size of the pool.
    pub fn worker_count(&self) -> usize {
        self.shared.target_workers.load(Ordering::SeqCst)
    }

    /// Resize the pool to `count` (clamped to `1..=MAX_WORKERS`).
    ///
    /// Growing starts threads immediately. Shrinking hands out retire
    /// tokens; a worker exits only after finishing its current job.
    pub fn set_worker_count(&self, count: usize) {
        let count = count.clamp(1, MAX_WORKERS);
        let current = self.shared.target_workers.swap(count, Ordering::SeqCst);
        if count > current {
            // Cancel outstanding retire tokens before adding threads.
            let mut grow = count - current;
            while grow > 0 && self.shared.try_retire() {
                grow -= 1;
            }
            let mut workers = self.workers.lock();
            workers.retain(|w| !w.is_finished());
            for _ in 0..grow {
                let shared = Arc::clone(&self.shared);
                let index = workers.len();
                let spawned = thread::Builder::new()
                    .name(format!("keeper-worker-{}", index))
                    .spawn(move || worker_loop(shared));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => error!(error = %e, "failed to spawn worker"),
                }
            }
        } else if count < current {
            self.shared
                .retire
                .fetch_add(current - count, Ordering::SeqCst);
        }
        debug!(from = current, to = count, "worker count set");
    }

    /// Stop every worker after its current job and join them. Jobs still
    /// queued are left unprocessed. Paused jobs could never finish, so they
    /// are canceled first.
    pub fn shutdown(&self) {
        if self.is_paused() {
            self.cancel_all();
        }
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.resumed.notify_all();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        self.shared.target_workers.store(0, Ordering::SeqCst);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("worker started");
    loop {
        if shared.stopping.load(Ordering::SeqCst) || shared.try_retire() {
            break;
        }
        if !shared.wait_for_gate() {
            continue;
        }
        match shared.queue_rx.recv_timeout(POLL_INTERVAL) {
            Ok(cell) => {
                if !hold_at_gate(&shared) {
                    debug!(job_id = %cell.snapshot().id, "scheduler stopped, held job dropped");
                    break;
                }
                run_job(&shared, cell)
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("worker exiting");
}

/// Keep a job dequeued just as the gate closed in the QUEUED state until the
/// gate reopens. Returns false if the scheduler stops first.
fn hold_at_gate(shared: &Shared) -> bool {
    if !shared.is_paused() {
        return true;
    }
    shared.held.fetch_add(1, Ordering::SeqCst);
    let open = loop {
        if shared.stopping.load(Ordering::SeqCst) {
            break false;
        }
        if shared.wait_for_gate() {
            break true;
        }
    };
    shared.held.fetch_sub(1, Ordering::SeqCst);
    open
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

fn run_job(shared: &Arc<Shared>, cell: Arc<JobCell>) {
    let (id, job_type, payload) = {
        let job = cell.job.lock();
        (job.id, job.job_type, job.payload.clone())
    };

    let handler = shared.handlers.read().get(&job_type).cloned();
    let Some(handler) = handler else {
        let message = KeeperError::HandlerMissing(job_type.to_string()).to_string();
        if let Some(job) = cell.fail(message) {
            warn!(job_id = %id, %job_type, "no handler registered");
            shared.notify_completed(&job);
        }
        return;
    };

    let Some(started) = cell.transition(JobStatus::Running) else {
        return;
    };
    shared.running.lock().insert(id, Arc::clone(&cell));
    debug!(job_id = %id, %job_type, "job started");
    shared.notify_updated(&started);

    // The gate may have closed between dequeue and start.
    if shared.is_paused() {
        if let Some(job) = cell.transition(JobStatus::Paused) {
            shared.notify_updated(&job);
        }
    }

    let ctx = JobContext {
        cell: Arc::clone(&cell),
        shared: Arc::clone(shared),
        payload,
        id,
        job_type,
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&ctx)));
    shared.running.lock().remove(&id);

    let finished = match outcome {
        Ok(Ok(())) => cell.transition(JobStatus::Completed),
        Ok(Err(e)) => {
            warn!(job_id = %id, %job_type, error = %e, "job failed");
            cell.fail(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(job_id = %id, %job_type, panic = %message, "job handler panicked");
            cell.fail(message)
        }
    };

    let job = finished.unwrap_or_else(|| cell.snapshot());
    debug!(job_id = %id, status = %job.status, "job finished");
    shared.notify_completed(&job);
}
