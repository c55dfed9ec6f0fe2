//! Background execution of prepared jobs.
//!
//! Request handlers push [`PreparedJob`]s into a bounded channel and return
//! immediately. A single long-lived worker task pulls jobs off the channel
//! and runs at most `max_concurrent_runs` reconstructions at once; the rest
//! wait in the channel.
//!
//! On cancellation the worker stops taking jobs, discards everything still
//! queued (removing those job directories), and gives in-flight runs up to
//! `shutdown_timeout` to finish before aborting them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatcher::{JobDispatcher, PreparedJob};
use crate::error::{DispatchError, DispatchFailure};

/// Tuning for the background worker.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Jobs that may wait for a free run slot.
    pub capacity: usize,
    /// Reconstructions running at the same time.
    pub max_concurrent_runs: usize,
    /// Grace period for in-flight runs at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            max_concurrent_runs: 1,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle for submitting prepared jobs to the background worker.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<PreparedJob>,
}

impl DispatchQueue {
    /// Spawn the worker task and return a handle to it.
    ///
    /// The worker runs until `cancel` fires or every handle is dropped.
    pub fn start(
        dispatcher: Arc<JobDispatcher>,
        config: QueueConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::bounded(config.capacity);
        let handle = tokio::spawn(run_worker(dispatcher, config, rx, cancel));
        (queue, handle)
    }

    fn bounded(capacity: usize) -> (Self, mpsc::Receiver<PreparedJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a job without waiting.
    ///
    /// A rejected job is dropped here, which removes its directory.
    pub fn submit(&self, job: PreparedJob) -> Result<Uuid, DispatchError> {
        let job_id = job.job_id();
        match self.tx.try_send(job) {
            Ok(()) => {
                tracing::info!(job_id = %job_id, "Job queued for reconstruction");
                Ok(job_id)
            }
            Err(TrySendError::Full(job)) => {
                drop(job);
                tracing::warn!(job_id = %job_id, "Dispatch queue full, job rejected");
                Err(DispatchError::new(job_id, DispatchFailure::QueueFull))
            }
            Err(TrySendError::Closed(job)) => {
                drop(job);
                tracing::warn!(job_id = %job_id, "Dispatch queue closed, job rejected");
                Err(DispatchError::new(job_id, DispatchFailure::QueueClosed))
            }
        }
    }

    /// Whether the worker still accepts jobs.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker(
    dispatcher: Arc<JobDispatcher>,
    config: QueueConfig,
    mut rx: mpsc::Receiver<PreparedJob>,
    cancel: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
    let mut running: JoinSet<()> = JoinSet::new();

    tracing::info!(
        capacity = config.capacity,
        max_concurrent_runs = config.max_concurrent_runs,
        "Reconstruction worker started",
    );

    loop {
        // Take a run slot first so waiting jobs stay counted in the channel.
        let permit: OwnedSemaphorePermit = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(joined) = running.join_next(), if !running.is_empty() => {
                log_join(joined);
                continue;
            }
            acquired = slots.clone().acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(job) => job,
                None => break,
            },
        };

        let dispatcher = Arc::clone(&dispatcher);
        running.spawn(async move {
            let _permit = permit;
            let job_id = job.job_id();
            match dispatcher.execute(job).await {
                Ok(output) => {
                    tracing::info!(
                        job_id = %job_id,
                        duration_ms = output.duration_ms,
                        "Reconstruction completed",
                    );
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %e.job_id,
                        error = %e.source,
                        "Reconstruction failed",
                    );
                }
            }
        });
    }

    tracing::info!("Reconstruction worker shutting down");

    rx.close();
    let mut discarded = 0usize;
    while let Ok(job) = rx.try_recv() {
        tracing::warn!(job_id = %job.job_id(), "Discarding queued job at shutdown");
        drop(job);
        discarded += 1;
    }

    let in_flight = running.len();
    if in_flight > 0 {
        tracing::info!(
            in_flight,
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Waiting for in-flight reconstructions",
        );
        let finished = tokio::time::timeout(config.shutdown_timeout, async {
            while let Some(joined) = running.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if finished.is_err() {
            tracing::warn!(
                remaining = running.len(),
                "Shutdown timeout elapsed, aborting in-flight reconstructions",
            );
            running.shutdown().await;
        }
    }

    tracing::info!(discarded, in_flight, "Reconstruction worker stopped");
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Reconstruction task panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;
    use meshgate_core::layout::{JobLayout, StorageRoots};
    use meshgate_core::staging::StagingOptions;
    use meshgate_core::status::{probe, JobStatus};

    use super::*;
    use crate::test_helpers::{png_upload, write_script, PRODUCES_NOTHING, WRITES_ARTIFACT};
    use crate::tool::ReconstructionTool;

    fn dispatcher(tmp: &tempfile::TempDir, body: &str) -> Arc<JobDispatcher> {
        let script = write_script(tmp.path(), "tool.sh", body);
        let tool = ReconstructionTool::new("/bin/sh").with_leading_args([script]);
        let roots = StorageRoots::new(tmp.path().join("uploads"), tmp.path().join("work"));
        Arc::new(JobDispatcher::new(roots, tool, StagingOptions::default()))
    }

    async fn prepare(d: &JobDispatcher) -> (PreparedJob, JobLayout) {
        let job = d.prepare(vec![png_upload(); 2]).await.unwrap();
        let layout = job.layout().clone();
        (job, layout)
    }

    async fn wait_for(layout: &JobLayout, expected: JobStatus) {
        for _ in 0..100 {
            if probe(layout).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("job {} never reached {expected:?}", layout.job_id);
    }

    #[tokio::test]
    async fn queued_job_runs_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(&tmp, WRITES_ARTIFACT);
        let cancel = CancellationToken::new();
        let (queue, worker) = DispatchQueue::start(d.clone(), QueueConfig::default(), cancel.clone());

        let (job, layout) = prepare(&d).await;
        assert_eq!(queue.submit(job).unwrap(), layout.job_id);

        wait_for(&layout, JobStatus::Completed).await;

        cancel.cancel();
        worker.await.unwrap();
        assert_eq!(probe(&layout).await, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failed_run_removes_job() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(&tmp, PRODUCES_NOTHING);
        let cancel = CancellationToken::new();
        let (queue, worker) = DispatchQueue::start(d.clone(), QueueConfig::default(), cancel.clone());

        let (job, layout) = prepare(&d).await;
        queue.submit(job).unwrap();

        wait_for(&layout, JobStatus::NotFound).await;

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn full_or_closed_queue_rejects_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(&tmp, PRODUCES_NOTHING);
        let (queue, rx) = DispatchQueue::bounded(1);

        let (first, first_layout) = prepare(&d).await;
        queue.submit(first).unwrap();

        let (second, second_layout) = prepare(&d).await;
        let err = queue.submit(second).unwrap_err();
        assert_matches!(err.source, DispatchFailure::QueueFull);
        assert_eq!(err.job_id, second_layout.job_id);
        assert!(!second_layout.root.exists());

        drop(rx);
        assert!(!queue.is_open());
        assert!(!first_layout.root.exists(), "queued job dropped with the channel");

        let (third, third_layout) = prepare(&d).await;
        assert_matches!(
            queue.submit(third).unwrap_err().source,
            DispatchFailure::QueueClosed
        );
        assert!(!third_layout.root.exists());
    }

    #[tokio::test]
    async fn shutdown_discards_queued_and_waits_for_running() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(&tmp, &format!("sleep 1\n{WRITES_ARTIFACT}"));
        let cancel = CancellationToken::new();
        let config = QueueConfig {
            capacity: 4,
            max_concurrent_runs: 1,
            shutdown_timeout: Duration::from_secs(10),
        };
        let (queue, worker) = DispatchQueue::start(d.clone(), config, cancel.clone());

        let (running, running_layout) = prepare(&d).await;
        let (waiting, waiting_layout) = prepare(&d).await;
        queue.submit(running).unwrap();
        queue.submit(waiting).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(probe(&running_layout).await, JobStatus::Completed);
        assert_eq!(probe(&waiting_layout).await, JobStatus::NotFound);
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let d = dispatcher(&tmp, "sleep 10");
        let cancel = CancellationToken::new();
        let config = QueueConfig {
            shutdown_timeout: Duration::from_millis(200),
            ..QueueConfig::default()
        };
        let (queue, worker) = DispatchQueue::start(d.clone(), config, cancel.clone());

        let (job, layout) = prepare(&d).await;
        queue.submit(job).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe(&layout).await, JobStatus::Processing);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker stops within the grace period")
            .unwrap();

        assert_eq!(probe(&layout).await, JobStatus::NotFound);
    }
}
