//! Bounded worker pool
//!
//! A fixed number of long-lived worker tasks pull file jobs from one FIFO
//! queue. Each job runs in its own task so a panic or a timeout only costs
//! that job, never the worker.

use futures::future::join_all;
use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collab::{BuildError, ModuleBuilder};
use crate::engine::{execute_file, RunOptions};
use crate::models::FileExecutionResult;
use crate::protocol::{EventSink, WorkerEvent};

/// Why a submission did not produce a result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("{0}")]
    Build(String),

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Execution timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Worker pool terminated")]
    Terminated,

    #[error("Worker pool setup failed: {0}")]
    SetupFailed(String),
}

pub type DispatchResult = Result<FileExecutionResult, DispatchError>;

/// One file to execute
#[derive(Clone, Debug)]
pub struct FileJob {
    pub entry: PathBuf,
}

impl FileJob {
    pub fn new(entry: impl Into<PathBuf>) -> Self {
        Self {
            entry: entry.into(),
        }
    }
}

struct Job {
    entry: PathBuf,
    sink: EventSink,
    reply: oneshot::Sender<DispatchResult>,
}

struct Shared {
    builder: Arc<dyn ModuleBuilder>,
    options: RunOptions,
    timeout: Option<Duration>,
    active: AtomicUsize,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<Result<FileExecutionResult, BuildError>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Parallelism available to the process, used when no worker count is configured
pub fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Pool of file-executing workers
pub struct WorkerPool {
    capacity: usize,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Spawn `capacity` workers. Must be called inside a tokio runtime.
    pub fn new(
        capacity: usize,
        builder: Arc<dyn ModuleBuilder>,
        options: RunOptions,
    ) -> Result<Self, DispatchError> {
        Self::with_timeout(capacity, builder, options, None)
    }

    /// Same as `new`, aborting any file that runs longer than `timeout`
    pub fn with_timeout(
        capacity: usize,
        builder: Arc<dyn ModuleBuilder>,
        options: RunOptions,
        timeout: Option<Duration>,
    ) -> Result<Self, DispatchError> {
        if capacity == 0 {
            return Err(DispatchError::SetupFailed(
                "worker count must be at least 1".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            builder,
            options,
            timeout,
            active: AtomicUsize::new(0),
        });

        let workers = (0..capacity)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone(), shared.clone())))
            .collect();

        info!("Worker pool started with {} workers", capacity);

        Ok(Self {
            capacity,
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            shared,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently executing
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Queue a file. The returned handle streams its events and result.
    pub fn submit(&self, job: FileJob) -> Result<PendingExecution, DispatchError> {
        let queue = lock(&self.queue);
        let Some(tx) = queue.as_ref() else {
            return Err(DispatchError::Terminated);
        };

        let (sink, events) = EventSink::channel();
        let (reply, outcome) = oneshot::channel();
        debug!("Queueing {}", job.entry.display());

        tx.send(Job {
            entry: job.entry,
            sink,
            reply,
        })
        .map_err(|_| DispatchError::Terminated)?;

        Ok(PendingExecution { events, outcome })
    }

    /// Stop every worker and wait until their tasks are gone. Running and
    /// queued submissions reject with `Terminated`.
    pub async fn shutdown(&self) {
        let Some(sender) = lock(&self.queue).take() else {
            return;
        };
        drop(sender);

        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for worker in &workers {
            worker.abort();
        }
        let count = workers.len();
        join_all(workers).await;
        info!("Worker pool terminated ({} workers)", count);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in lock(&self.workers).iter() {
            worker.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A submitted file whose events have not been consumed yet
pub struct PendingExecution {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    outcome: oneshot::Receiver<DispatchResult>,
}

impl PendingExecution {
    /// Relay every event of this submission to `listener`, then resolve
    pub async fn drive<F>(mut self, mut listener: F) -> DispatchResult
    where
        F: FnMut(WorkerEvent),
    {
        while let Some(event) = self.events.recv().await {
            listener(event);
        }

        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Terminated),
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    shared: Arc<Shared>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        debug!("Worker {} picked up {}", id, job.entry.display());
        shared.active.fetch_add(1, Ordering::SeqCst);
        let result = run_job(&shared, job.entry, job.sink).await;
        shared.active.fetch_sub(1, Ordering::SeqCst);

        if job.reply.send(result).is_err() {
            debug!("Worker {}: submitter went away before the result", id);
        }
    }
    debug!("Worker {} stopped", id);
}

async fn run_job(shared: &Shared, entry: PathBuf, sink: EventSink) -> DispatchResult {
    let builder = shared.builder.clone();
    let options = shared.options.clone();
    let mut task = AbortOnDrop(tokio::spawn(async move {
        execute_file(builder.as_ref(), &entry, &options, &sink).await
    }));

    let joined = match shared.timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("File execution exceeded {:?}, aborting", limit);
                return Err(DispatchError::Timeout(limit));
            }
        },
        None => (&mut task.0).await,
    };

    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(DispatchError::Build(e.to_string())),
        Err(e) if e.is_panic() => Err(DispatchError::WorkerCrashed(panic_message(e.into_panic()))),
        Err(e) => Err(DispatchError::WorkerCrashed(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
