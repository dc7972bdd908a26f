//! Background job runner
//!
//! A fixed-size rayon pool that runs queued work on its own threads. Each
//! submission gets a [`JobHandle`] that yields the outcome exactly once; a
//! job that fails or panics reports [`JobOutcome::Failed`] and the worker
//! moves on to the next job.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{IndexError, Result};

pub type JobId = u64;

/// Unit of work for [`JobRunner::submit`]
pub trait Job: Send + 'static {
    type Output: Send + 'static;

    /// Short name used in logs
    fn name(&self) -> String;

    fn execute(self) -> Result<Self::Output>;
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome<T> {
    Completed(T),
    Failed(IndexError),
}

impl<T> JobOutcome<T> {
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(e) => Err(e),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Receiving end for one job's outcome
#[derive(Debug)]
pub struct JobHandle<T> {
    id: JobId,
    rx: mpsc::Receiver<JobOutcome<T>>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Block until the job finishes
    pub fn wait(self) -> JobOutcome<T> {
        self.rx.recv().unwrap_or_else(|_| {
            JobOutcome::Failed(IndexError::JobFailed {
                message: format!("job {} was dropped before completing", self.id),
            })
        })
    }

    /// Poll without blocking; `None` if the job is still running
    pub fn try_outcome(&self) -> Option<JobOutcome<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(JobOutcome::Failed(
                IndexError::JobFailed {
                    message: format!("job {} was dropped before completing", self.id),
                },
            )),
        }
    }

    /// Wait at most `timeout`; `None` if the job is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(JobOutcome::Failed(
                IndexError::JobFailed {
                    message: format!("job {} was dropped before completing", self.id),
                },
            )),
        }
    }
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) {
        *self.count.lock() += 1;
    }

    fn leave(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed pool of worker threads
pub struct JobRunner {
    name: String,
    pool: rayon::ThreadPool,
    workers: usize,
    next_id: AtomicU64,
    in_flight: Arc<InFlight>,
}

impl JobRunner {
    /// Create a pool of `workers` threads (at least one)
    pub fn new(name: impl Into<String>, workers: usize) -> Result<Self> {
        let name = name.into();
        let workers = workers.max(1);
        let thread_prefix = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .build()
            .map_err(|e| IndexError::JobFailed {
                message: format!("cannot start {} pool: {}", name, e),
            })?;

        tracing::debug!("Started {} pool with {} workers", name, workers);
        Ok(Self {
            name,
            pool,
            workers,
            next_id: AtomicU64::new(0),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a [`Job`]
    pub fn submit<J: Job>(&self, job: J) -> JobHandle<J::Output> {
        let name = job.name();
        self.spawn(name, move || job.execute())
    }

    /// Queue a closure. Jobs start in submission order.
    pub fn spawn<T, F>(&self, name: impl Into<String>, work: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let name = name.into();
        let (tx, rx) = mpsc::sync_channel(1);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.enter();

        self.pool.spawn_fifo(move || {
            let started = Instant::now();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(Ok(value)) => JobOutcome::Completed(value),
                Ok(Err(e)) => {
                    tracing::warn!("Job {} ({}) failed: {}", id, name, e);
                    JobOutcome::Failed(e)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!("Job {} ({}) panicked: {}", id, name, message);
                    JobOutcome::Failed(IndexError::JobFailed {
                        message: format!("{} panicked: {}", name, message),
                    })
                }
            };
            tracing::debug!("Job {} ({}) finished in {:?}", id, name, started.elapsed());
            // The submitter may have dropped its handle
            let _ = tx.send(outcome);
            in_flight.leave();
        });

        JobHandle { id, rx }
    }

    /// Jobs queued or running
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock()
    }

    /// Wait up to `timeout` for every queued job to finish.
    /// Returns the number still outstanding when the wait ended.
    pub fn drain(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut count = self.in_flight.count.lock();
        while *count > 0 {
            if self.in_flight.idle.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        let remaining = *count;
        if remaining > 0 {
            tracing::warn!(
                "{} pool: abandoning {} unfinished jobs after {:?}",
                self.name,
                remaining,
                timeout
            );
        }
        remaining
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
