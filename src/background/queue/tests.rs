use super::*;
use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{Condvar, atomic::AtomicUsize},
    time::{Duration, Instant},
};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

/// Copies inputs to the output dir, optionally holding every call until the gate opens.
#[derive(Default)]
struct StubExecutor {
    gated: bool,
    gate: Mutex<bool>,
    opened: Condvar,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Option<Duration>,
}

impl StubExecutor {
    fn gated() -> Self {
        Self {
            gated: true,
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn open(&self) {
        *self.gate.lock().unwrap() = true;
        self.opened.notify_all();
    }

    fn wait_for_gate(&self, cancel: &CancellationToken) -> Result<(), ProcessingError> {
        let mut open = self.gate.lock().unwrap();
        while !*open {
            if cancel.is_cancelled() {
                return Err(ProcessingError::Cancelled);
            }
            open = self
                .opened
                .wait_timeout(open, Duration::from_millis(20))
                .unwrap()
                .0;
        }
        Ok(())
    }
}

impl PipelineExecutor for StubExecutor {
    fn execute(
        &self,
        input_paths: &[PathBuf],
        output_dir: &Path,
        pipeline: &PipelineDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let outcome = (|| {
            if pipeline.extra.contains_key("panic") {
                panic!("executor blew up");
            }
            if pipeline.extra.contains_key("fail") {
                return Err(ProcessingError::execution("exit status: 1", "bad pipeline"));
            }
            if self.gated {
                self.wait_for_gate(cancel)?;
            }
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            for input in input_paths {
                fs::copy(input, output_dir.join(input.file_name().unwrap())).unwrap();
            }
            Ok(())
        })();

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn setup(executor: StubExecutor) -> (TempDir, Arc<StubExecutor>, JobQueue) {
    let root = tempfile::tempdir().unwrap();
    let executor = Arc::new(executor);
    let queue = JobQueue::new(ArtifactStore::new(root.path()), executor.clone());
    (root, executor, queue)
}

fn batch(names: &[&str]) -> (Vec<Box<dyn Read + Send>>, Vec<String>) {
    let files = names
        .iter()
        .map(|name| Box::new(Cursor::new(name.as_bytes().to_vec())) as Box<dyn Read + Send>)
        .collect();
    let filenames = names.iter().map(|name| name.to_string()).collect();
    (files, filenames)
}

fn pipeline_with(flag: &str) -> PipelineDescriptor {
    PipelineDescriptor::from_json(&format!(r#"{{"nodes":[],"edges":[],"{flag}":true}}"#)).unwrap()
}

async fn submit(queue: &JobQueue, names: &[&str]) -> JobHandle {
    let (files, filenames) = batch(names);
    queue
        .submit(files, filenames, PipelineDescriptor::default())
        .await
        .unwrap()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let start = Instant::now();
    while !check() {
        assert!(start.elapsed() < WAIT, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn submit_before_initialize_fails() {
    let (_root, _executor, queue) = setup(StubExecutor::default());
    let (files, filenames) = batch(&["a.png"]);

    let err = queue
        .submit(files, filenames, PipelineDescriptor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessingError::NotInitialized));
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let (_root, _executor, queue) = setup(StubExecutor::default());
    queue.initialize(2, 4);
    queue.initialize(8, 32);

    let stats = queue.stats();
    assert_eq!(stats.workers, 2);
    assert_eq!(stats.capacity, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn processes_job_and_collects_outputs() {
    let (_root, _executor, queue) = setup(StubExecutor::default());
    queue.initialize(1, 4);

    let handle = submit(&queue, &["a.png", "b.txt", "c.jpg"]).await;
    let job_id = handle.id();
    let result = handle.wait(WAIT).await.unwrap();

    assert_eq!(result.job_id, job_id);
    let dirs = queue.artifacts().dirs(job_id);
    assert_eq!(
        result.into_result().unwrap(),
        vec![dirs.output.join("a.png"), dirs.output.join("c.jpg")]
    );

    queue.artifacts().cleanup(job_id).unwrap();
    assert!(!dirs.input.exists());
    assert!(!dirs.output.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_image_batch_reports_input_error() {
    let (_root, executor, queue) = setup(StubExecutor::default());
    queue.initialize(1, 4);

    let handle = submit(&queue, &["notes.txt"]).await;
    let job_id = handle.id();
    let result = handle.wait(WAIT).await.unwrap();

    assert!(result.output_files.is_empty());
    assert!(matches!(result.error, Some(ProcessingError::NoValidImages)));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

    queue.artifacts().cleanup(job_id).unwrap();
    let dirs = queue.artifacts().dirs(job_id);
    assert!(!dirs.input.exists());
    assert!(!dirs.output.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mismatched_filenames_are_rejected() {
    let (_root, _executor, queue) = setup(StubExecutor::default());
    queue.initialize(1, 4);
    let (files, _) = batch(&["a.png", "b.png"]);

    let err = queue
        .submit(files, vec!["a.png".to_string()], PipelineDescriptor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessingError::InvalidSubmission(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_gets_one_result_and_concurrency_is_bounded() {
    let (_root, executor, queue) = setup(StubExecutor::slow(Duration::from_millis(50)));
    queue.initialize(2, 3);

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(submit(&queue, &["a.png"]).await);
    }
    let results = join_all(handles.into_iter().map(|h| h.wait(WAIT))).await;

    assert_eq!(results.len(), 8);
    for result in results {
        assert!(result.unwrap().is_success());
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 8);
    assert!(executor.max_running.load(Ordering::SeqCst) <= 2);

    let stats = queue.stats();
    assert_eq!(stats.completed, 8);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_buffer_blocks_submission() {
    let (_root, executor, queue) = setup(StubExecutor::gated());
    let capacity = 2;
    queue.initialize(1, capacity);

    // The single worker takes the first job and holds it at the gate.
    let mut handles = vec![submit(&queue, &["0.png"]).await];
    eventually("first job to start", || executor.calls.load(Ordering::SeqCst) == 1).await;
    for i in 1..=capacity {
        let name = format!("{i}.png");
        handles.push(submit(&queue, &[name.as_str()]).await);
    }

    let blocked = tokio::spawn({
        let queue = queue.clone();
        async move { submit(&queue, &["last.png"]).await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!blocked.is_finished());

    let stats = queue.stats();
    assert_eq!(stats.queued, capacity);
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.in_flight, 1);

    executor.open();
    handles.push(blocked.await.unwrap());
    for handle in handles {
        assert!(handle.wait(WAIT).await.unwrap().is_success());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn try_submit_rejects_when_full() {
    let (_root, executor, queue) = setup(StubExecutor::gated());
    queue.initialize(1, 1);

    let running = submit(&queue, &["0.png"]).await;
    eventually("first job to start", || executor.calls.load(Ordering::SeqCst) == 1).await;
    let (files, filenames) = batch(&["1.png"]);
    let queued = queue
        .try_submit(files, filenames, PipelineDescriptor::default())
        .unwrap();

    let (files, filenames) = batch(&["2.png"]);
    let err = queue
        .try_submit(files, filenames, PipelineDescriptor::default())
        .unwrap_err();
    assert!(matches!(err, ProcessingError::QueueFull));

    executor.open();
    assert!(running.wait(WAIT).await.unwrap().is_success());
    assert!(queued.wait(WAIT).await.unwrap().is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failures_stay_inside_their_job() {
    let (_root, _executor, queue) = setup(StubExecutor::default());
    queue.initialize(1, 4);

    let (files, filenames) = batch(&["a.png"]);
    let failing = queue
        .submit(files, filenames, pipeline_with("fail"))
        .await
        .unwrap();
    let (files, filenames) = batch(&["b.png"]);
    let panicking = queue
        .submit(files, filenames, pipeline_with("panic"))
        .await
        .unwrap();
    let healthy = submit(&queue, &["c.png"]).await;

    let failed = failing.wait(WAIT).await.unwrap();
    assert!(matches!(failed.error, Some(ProcessingError::Execution { .. })));
    assert!(failed.output_files.is_empty());

    let panicked = panicking.wait(WAIT).await.unwrap();
    assert!(matches!(panicked.error, Some(ProcessingError::Internal(_))));

    assert!(healthy.wait(WAIT).await.unwrap().is_success());
    assert_eq!(queue.stats().failed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_cancels_job_and_reclaims_artifacts() {
    let (_root, executor, queue) = setup(StubExecutor::gated());
    queue.initialize(1, 4);

    let handle = submit(&queue, &["a.png"]).await;
    let job_id = handle.id();
    eventually("job to start", || executor.calls.load(Ordering::SeqCst) == 1).await;

    let err = handle.wait(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, ProcessingError::Timeout(_)));

    eventually("abandoned job to be reclaimed", || queue.stats().abandoned == 1).await;
    let dirs = queue.artifacts().dirs(job_id);
    assert!(!dirs.input.exists());
    assert!(!dirs.output.exists());
    assert_eq!(executor.running.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_handle_skips_queued_job() {
    let (_root, executor, queue) = setup(StubExecutor::gated());
    queue.initialize(1, 4);

    let running = submit(&queue, &["a.png"]).await;
    eventually("first job to start", || executor.calls.load(Ordering::SeqCst) == 1).await;
    drop(submit(&queue, &["b.png"]).await);

    executor.open();
    assert!(running.wait(WAIT).await.unwrap().is_success());
    eventually("dropped job to be answered", || queue.stats().abandoned == 1).await;
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_drains_queued_jobs() {
    let (_root, _executor, queue) = setup(StubExecutor::slow(Duration::from_millis(20)));
    queue.initialize(1, 8);

    let mut handles = Vec::new();
    for _ in 0..3 {
        handles.push(submit(&queue, &["a.png"]).await);
    }
    queue.shutdown().await;

    for handle in handles {
        assert!(handle.wait(WAIT).await.unwrap().is_success());
    }
    let (files, filenames) = batch(&["late.png"]);
    let err = queue
        .submit(files, filenames, PipelineDescriptor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessingError::QueueClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_answers_queued_jobs() {
    let (_root, executor, queue) = setup(StubExecutor::gated());
    queue.initialize(1, 8);

    let running = submit(&queue, &["a.png"]).await;
    eventually("first job to start", || executor.calls.load(Ordering::SeqCst) == 1).await;
    let queued = submit(&queue, &["b.png"]).await;

    let waiting = tokio::spawn(async move {
        (
            running.wait(WAIT).await.unwrap(),
            queued.wait(WAIT).await.unwrap(),
        )
    });
    queue.cancel().await;

    let (running, queued) = waiting.await.unwrap();
    assert!(matches!(running.error, Some(ProcessingError::Cancelled)));
    assert!(matches!(queued.error, Some(ProcessingError::Cancelled)));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}
