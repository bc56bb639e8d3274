//! Bounded job queue in front of a fixed pool of pipeline workers.
//!
//! Request handlers submit jobs into a bounded FIFO buffer; `worker_count` long-lived workers take
//! them one at a time and run the blocking pipeline tool on the blocking thread pool. The number of
//! workers is therefore the limit on concurrently running tool processes, and a full buffer makes
//! [`JobQueue::submit`] wait, which is the only backpressure.

mod handle;
mod job;
mod worker;

pub use handle::JobHandle;
pub use job::ProcessingResult;

use crate::{
    background::processors::{ArtifactStore, PipelineExecutor},
    common::errors::ProcessingError,
    models::PipelineDescriptor,
};
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use std::{
    io::Read,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use job::Job;
use worker::{Counters, WorkerContext, run_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub workers: usize,
    pub capacity: usize,
    /// Jobs sitting in the buffer. Never exceeds `capacity`.
    pub queued: usize,
    /// Submitters blocked on a full buffer.
    pub waiting: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
}

/// Process-wide scheduler, created once by `main` and shared with the handlers.
///
/// Cloning is cheap; all clones drive the same pool.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: WorkerContext,
    pool: OnceLock<PoolInfo>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
struct PoolInfo {
    workers: usize,
    capacity: usize,
}

impl JobQueue {
    pub fn new(store: ArtifactStore, executor: Arc<dyn PipelineExecutor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx: WorkerContext {
                    store,
                    executor,
                    counters: Arc::new(Counters::default()),
                },
                pool: OnceLock::new(),
                sender: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.ctx.store
    }

    /// Starts the workers. Only the first call has an effect; the pool size is fixed afterwards.
    ///
    /// Must be called from within a Tokio runtime. Zero sizes are raised to one.
    pub fn initialize(&self, worker_count: usize, queue_capacity: usize) {
        let mut started = false;
        let info = self.inner.pool.get_or_init(|| {
            started = true;
            self.start(worker_count.max(1), queue_capacity.max(1))
        });
        if started {
            info!(
                "Initialized CV processing queue with {} workers and buffer size {}",
                info.workers, info.capacity
            );
        } else {
            warn!(
                "CV processing queue already running with {} workers; ignoring re-initialization",
                info.workers
            );
        }
    }

    fn start(&self, workers: usize, capacity: usize) -> PoolInfo {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(worker_id, rx.clone(), self.inner.ctx.clone()))
            })
            .collect();

        *lock(&self.inner.sender) = Some(tx);
        *lock(&self.inner.workers) = handles;
        PoolInfo { workers, capacity }
    }

    /// Enqueues a job, waiting for buffer space when the queue is full.
    pub async fn submit(
        &self,
        files: Vec<Box<dyn Read + Send>>,
        filenames: Vec<String>,
        pipeline: PipelineDescriptor,
    ) -> Result<JobHandle, ProcessingError> {
        let sender = self.sender()?;
        let (job, handle) = Job::new(files, filenames, pipeline, &self.inner.shutdown)?;

        let sent = {
            let _waiting = WaitingGuard::new(&self.counters().waiting);
            sender.send(job).await
        };
        if sent.is_err() {
            return Err(ProcessingError::QueueClosed);
        }
        info!("Job {} added to queue", handle.id());
        Ok(handle)
    }

    /// Like [`submit`](Self::submit) but fails with [`ProcessingError::QueueFull`] instead of
    /// waiting for buffer space.
    pub fn try_submit(
        &self,
        files: Vec<Box<dyn Read + Send>>,
        filenames: Vec<String>,
        pipeline: PipelineDescriptor,
    ) -> Result<JobHandle, ProcessingError> {
        let sender = self.sender()?;
        let (job, handle) = Job::new(files, filenames, pipeline, &self.inner.shutdown)?;

        if let Err(err) = sender.try_send(job) {
            return Err(match err {
                TrySendError::Full(_) => ProcessingError::QueueFull,
                TrySendError::Closed(_) => ProcessingError::QueueClosed,
            });
        }
        info!("Job {} added to queue", handle.id());
        Ok(handle)
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>, ProcessingError> {
        if self.inner.pool.get().is_none() {
            return Err(ProcessingError::NotInitialized);
        }
        lock(&self.inner.sender)
            .clone()
            .ok_or(ProcessingError::QueueClosed)
    }

    /// Stops admission, lets the workers finish every queued job and waits for them to exit.
    pub async fn shutdown(&self) {
        lock(&self.inner.sender).take();
        self.join_workers().await;
    }

    /// Stops admission and cancels every job. Queued jobs are answered with
    /// [`ProcessingError::Cancelled`] and running pipeline processes are killed.
    pub async fn cancel(&self) {
        lock(&self.inner.sender).take();
        self.inner.shutdown.cancel();
        self.join_workers().await;
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *lock(&self.inner.workers));
        if handles.is_empty() {
            return;
        }
        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!("CV worker ended abnormally: {}", err);
            }
        }
        info!("CV processing queue stopped");
    }

    pub fn stats(&self) -> QueueStats {
        let pool = self.inner.pool.get().copied().unwrap_or(PoolInfo {
            workers: 0,
            capacity: 0,
        });
        let queued = lock(&self.inner.sender)
            .as_ref()
            .map_or(0, |sender| sender.max_capacity() - sender.capacity());
        let counters = self.counters();
        QueueStats {
            workers: pool.workers,
            capacity: pool.capacity,
            queued,
            waiting: counters.waiting.load(Ordering::SeqCst),
            in_flight: counters.in_flight.load(Ordering::SeqCst),
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            abandoned: counters.abandoned.load(Ordering::SeqCst),
        }
    }

    fn counters(&self) -> &Counters {
        &self.inner.ctx.counters
    }
}

/// Counts a submitter blocked on a full buffer, also when its request goes away mid-wait.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
