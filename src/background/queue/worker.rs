use crate::{
    background::processors::{ArtifactStore, PipelineExecutor, Upload},
    common::errors::{ProcessingError, handle_error},
    models::PipelineDescriptor,
};
use anyhow::anyhow;
use log::{info, warn};
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::spawn_blocking,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::{Job, ProcessingResult};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub waiting: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
    pub abandoned: AtomicUsize,
}

/// Everything a worker needs to run a job. Cheap to clone into the blocking pool.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub store: ArtifactStore,
    pub executor: Arc<dyn PipelineExecutor>,
    pub counters: Arc<Counters>,
}

/// Pulls jobs until the queue is closed and drained.
pub(crate) async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    ctx: WorkerContext,
) {
    info!("CV worker {} started", worker_id);
    loop {
        // The lock is released before the job runs so idle workers can take the next one.
        let next = receiver.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        ctx.process(worker_id, job).await;
    }
    info!("CV worker {} stopped", worker_id);
}

impl WorkerContext {
    async fn process(&self, worker_id: usize, job: Job) {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let start_time = Instant::now();

        let Job {
            id,
            uploads,
            filenames,
            pipeline,
            result_tx,
            cancel,
        } = job;
        info!("Worker {} processing job {}", worker_id, id);

        let ctx = self.clone();
        let outcome =
            spawn_blocking(move || ctx.run_job(id, uploads, &filenames, &pipeline, &cancel)).await;
        let result = match outcome {
            Ok(Ok(output_files)) => ProcessingResult::success(id, output_files),
            Ok(Err(err)) => ProcessingResult::failure(id, err),
            Err(join_err) => {
                let err = handle_error(anyhow!(join_err).context(format!("job {} panicked", id)));
                ProcessingResult::failure(id, ProcessingError::Internal(format!("{:#}", err)))
            }
        };

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        match &result.error {
            None => {
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                info!(duration = &*format!("{:?}", start_time.elapsed());
                    "Worker {} completed job {} with {} outputs",
                    worker_id,
                    id,
                    result.output_files.len()
                );
            }
            Some(err) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(duration = &*format!("{:?}", start_time.elapsed());
                    "Worker {} failed job {}: {}",
                    worker_id,
                    id,
                    err
                );
            }
        }

        if result_tx.send(result).is_err() {
            // Nobody will consume the outputs, so nobody else will clean them up.
            self.counters.abandoned.fetch_add(1, Ordering::SeqCst);
            warn!("Result of job {} was abandoned; reclaiming artifacts", id);
            let store = self.store.clone();
            match spawn_blocking(move || store.cleanup(id)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("Failed to reclaim artifacts of job {}: {}", id, err),
                Err(err) => warn!("Failed to reclaim artifacts of job {}: {}", id, err),
            }
        }
    }

    /// Stage, execute, collect. Runs on the blocking pool.
    fn run_job(
        &self,
        id: Uuid,
        uploads: Vec<Upload>,
        filenames: &[String],
        pipeline: &PipelineDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, ProcessingError> {
        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        let inputs = self.store.stage_inputs(id, uploads)?;
        let output_dir = self.store.dirs(id).output;
        self.executor.execute(&inputs, &output_dir, pipeline, cancel)?;
        Ok(self.store.collect_outputs(id, filenames))
    }
}
