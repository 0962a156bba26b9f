// THEORY:
// Model inference (and image decoding, which is just as CPU hungry) must never run
// on the async executor that accepts new calls. The `InferencePool` is a fixed set
// of workers fed through a `tokio::mpsc` queue; each job carries a `oneshot`
// sender for its result, exactly like a frame task in a parallel vision pipeline.
//
// Key principles:
// 1.  **Bounded**: there are `worker_count` workers and each runs one job at a
//     time on the blocking thread pool, so at most `worker_count` inferences are
//     in flight no matter how many calls are waiting.
// 2.  **Deadline-aware**: a caller waits for its result only until its deadline.
//     A job whose deadline passed while it sat in the queue, or whose caller has
//     already given up, is dropped without running, so no partially computed
//     state outlives the call that asked for it.
// 3.  **Stage-tagged**: every job names its pipeline stage, so a timeout or a
//     lost worker surfaces as an error for that stage.

use crate::error::{AnalysisError, ModelError, Stage};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct InferenceTask {
    stage: Stage,
    deadline: Instant,
    job: Job,
}

/// A bounded pool of inference workers.
pub struct InferencePool {
    task_sender: mpsc::UnboundedSender<InferenceTask>,
    workers: Vec<JoinHandle<()>>,
}

impl InferencePool {
    /// Spawns `worker_count` workers on the current tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (task_sender, task_receiver) = mpsc::unbounded_channel::<InferenceTask>();
        let task_receiver = Arc::new(Mutex::new(task_receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queue = Arc::clone(&task_receiver);
            let worker = tokio::spawn(async move {
                loop {
                    let next = { queue.lock().await.recv().await };
                    let Some(task) = next else { break };

                    if Instant::now() >= task.deadline {
                        debug!(worker_id, stage = %task.stage, "dropping job whose deadline already passed");
                        continue;
                    }

                    let stage = task.stage;
                    if let Err(e) = tokio::task::spawn_blocking(task.job).await {
                        warn!(worker_id, %stage, "inference job aborted: {e}");
                    }
                }
            });
            workers.push(worker);
        }

        Self { task_sender, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs `work` on a pool worker and waits for its output until `deadline`.
    pub async fn run<T, F>(&self, stage: Stage, deadline: Instant, work: F) -> Result<T, AnalysisError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_sender, result_receiver) = oneshot::channel::<T>();
        let job: Job = Box::new(move || {
            if result_sender.is_closed() {
                return;
            }
            let _ = result_sender.send(work());
        });

        self.task_sender
            .send(InferenceTask { stage, deadline, job })
            .map_err(|_| unavailable(stage, "inference pool has shut down"))?;

        match timeout_at(deadline, result_receiver).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(_)) if Instant::now() >= deadline => Err(AnalysisError::DeadlineExceeded { stage }),
            Ok(Err(_)) => Err(unavailable(stage, "worker dropped the job before finishing")),
            Err(_) => Err(AnalysisError::DeadlineExceeded { stage }),
        }
    }

    /// Runs a job that itself may fail with a model error.
    pub async fn infer<T, F>(&self, stage: Stage, deadline: Instant, work: F) -> Result<T, AnalysisError>
    where
        F: FnOnce() -> Result<T, ModelError> + Send + 'static,
        T: Send + 'static,
    {
        self.run(stage, deadline, work)
            .await?
            .map_err(|source| AnalysisError::model(stage, source))
    }

    /// Closes the queue and waits for the workers to drain.
    pub async fn shutdown(self) {
        let InferencePool { task_sender, workers } = self;
        drop(task_sender);
        for worker in workers {
            let _ = worker.await;
        }
    }
}

fn unavailable(stage: Stage, detail: &str) -> AnalysisError {
    AnalysisError::model(stage, ModelError::WorkerUnavailable(detail.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn in_a_while() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn returns_job_output() {
        let pool = InferencePool::new(2);
        let sum = pool
            .run(Stage::Embedding, in_a_while(), || (1..=10).sum::<u32>())
            .await
            .expect("job runs");
        assert_eq!(sum, 55);
        assert_eq!(pool.worker_count(), 2);
    }

    #[tokio::test]
    async fn model_errors_are_tagged_with_their_stage() {
        let pool = InferencePool::new(1);
        let error = pool
            .infer::<(), _>(Stage::Ocr, in_a_while(), || Err(ModelError::Inference("decoder diverged".into())))
            .await
            .expect_err("model failure");
        assert!(matches!(
            error,
            AnalysisError::ModelInference { stage: Stage::Ocr, source: ModelError::Inference(_) }
        ));
    }

    #[tokio::test]
    async fn slow_jobs_surface_as_deadline_exceeded() {
        let pool = InferencePool::new(1);
        let deadline = Instant::now() + Duration::from_millis(20);
        let error = pool
            .run(Stage::Detection, deadline, || std::thread::sleep(Duration::from_millis(200)))
            .await
            .expect_err("deadline passes first");
        assert!(matches!(error, AnalysisError::DeadlineExceeded { stage: Stage::Detection }));
    }

    #[tokio::test]
    async fn expired_jobs_never_run() {
        let pool = InferencePool::new(1);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let error = pool
            .run(Stage::Embedding, Instant::now(), move || flag.store(true, Ordering::SeqCst))
            .await
            .expect_err("deadline already passed");
        assert!(matches!(error, AnalysisError::DeadlineExceeded { .. }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_jobs_than_workers() {
        let pool = Arc::new(InferencePool::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..6).map(|_| {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                pool.run(Stage::Embedding, in_a_while(), move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });
        for outcome in futures::future::join_all(calls).await {
            outcome.expect("job completes");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn shutdown_waits_for_idle_workers_to_exit() {
        let pool = InferencePool::new(3);
        pool.run(Stage::Ocr, in_a_while(), || ()).await.expect("job runs");

        tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .expect("workers exit once the queue closes");
    }
}
