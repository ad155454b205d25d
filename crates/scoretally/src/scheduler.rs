//! Wave-based batch scheduler.
//!
//! A batch is split into consecutive waves of at most `concurrency_limit`
//! jobs. All jobs of a wave are driven concurrently on the calling task and
//! the next wave starts only once every job of the current one is terminal.
//! Independent batches do not share the limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};

use crate::error::GatewayError;
use crate::gateway::ExtractionGateway;
use crate::images::ImageStore;
use crate::job::{Job, JobState};
use crate::store::{JobStore, JobUpdate};

/// Outcome of one batch, broadcast once its last wave resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs left `Pending` because the batch was aborted before their wave.
    pub skipped: usize,
    pub aborted: bool,
}

/// Shared abort/finished flags for one running batch.
#[derive(Debug, Default)]
pub struct BatchControl {
    aborted: AtomicBool,
    finished: AtomicBool,
}

impl BatchControl {
    /// Stops the batch before its next wave. In-flight jobs run to completion.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

/// Handle to a batch running on the tokio runtime.
pub struct BatchHandle {
    pub batch_id: String,
    control: Arc<BatchControl>,
    join: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    pub fn abort(&self) {
        self.control.abort();
    }

    pub fn control(&self) -> Arc<BatchControl> {
        Arc::clone(&self.control)
    }

    pub async fn wait(self) -> Result<BatchSummary, JoinError> {
        self.join.await
    }
}

pub struct BatchScheduler {
    store: Arc<JobStore>,
    images: Arc<ImageStore>,
    gateway: Arc<dyn ExtractionGateway>,
    concurrency_limit: usize,
}

impl BatchScheduler {
    /// # Panics
    /// Panics if `concurrency_limit` is 0.
    pub fn new(
        store: Arc<JobStore>,
        images: Arc<ImageStore>,
        gateway: Arc<dyn ExtractionGateway>,
        concurrency_limit: usize,
    ) -> Self {
        assert!(concurrency_limit > 0, "concurrency_limit must be > 0");
        Self {
            store,
            images,
            gateway,
            concurrency_limit,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Runs `jobs` on a new tokio task. The jobs must already be in the store.
    pub fn spawn(self: &Arc<Self>, batch_id: String, jobs: Vec<Job>) -> BatchHandle {
        let control = Arc::new(BatchControl::default());
        let scheduler = Arc::clone(self);
        let task_control = Arc::clone(&control);
        let task_batch_id = batch_id.clone();

        let join = tokio::spawn(async move {
            scheduler
                .run(&task_batch_id, &jobs, &task_control)
                .await
        });

        BatchHandle {
            batch_id,
            control,
            join,
        }
    }

    /// Drives every job to a terminal state, one wave at a time.
    pub async fn run(&self, batch_id: &str, jobs: &[Job], control: &BatchControl) -> BatchSummary {
        let mut summary = BatchSummary {
            batch_id: batch_id.to_string(),
            total: jobs.len(),
            ..BatchSummary::default()
        };

        info!(
            "Batch {} started: {} jobs, waves of {}",
            batch_id,
            jobs.len(),
            self.concurrency_limit
        );

        for (index, wave) in jobs.chunks(self.concurrency_limit).enumerate() {
            if control.is_aborted() {
                summary.aborted = true;
                summary.skipped += jobs.len() - index * self.concurrency_limit;
                info!(
                    "Batch {} aborted, {} jobs not started",
                    batch_id, summary.skipped
                );
                break;
            }

            debug!("Batch {} wave {}: {} jobs", batch_id, index, wave.len());
            let outcomes = join_all(wave.iter().map(|job| self.process(job))).await;

            for outcome in outcomes {
                match outcome {
                    Some(JobState::Success) => summary.succeeded += 1,
                    Some(JobState::Error) => summary.failed += 1,
                    _ => summary.skipped += 1,
                }
            }
        }

        info!(
            "Batch {} finished: {} succeeded, {} failed, {} skipped",
            batch_id, summary.succeeded, summary.failed, summary.skipped
        );
        control.mark_finished();
        self.store.notify_batch_completed(summary.clone());
        summary
    }

    /// Returns the terminal state reached, or `None` if the job was discarded
    /// from the store while the batch was running.
    async fn process(&self, job: &Job) -> Option<JobState> {
        if let Err(e) = self.store.apply(JobUpdate::Started {
            job_id: job.id.clone(),
        }) {
            warn!("Not starting job {}: {}", job.id, e);
            return None;
        }
        debug!("Job {} ({}) processing", job.id, job.source_name);

        let result = match self.images.resolve(&job.image) {
            Some(image) => self.gateway.extract(&image).await,
            None => Err(GatewayError::Image(format!(
                "{} was released",
                job.source_name
            ))),
        };

        let (update, state) = match result {
            Ok(records) => {
                debug!(
                    "Job {} ({}) extracted {} records",
                    job.id,
                    job.source_name,
                    records.len()
                );
                (
                    JobUpdate::Succeeded {
                        job_id: job.id.clone(),
                        records,
                    },
                    JobState::Success,
                )
            }
            Err(e) => {
                warn!("Job {} ({}) failed: {}", job.id, job.source_name, e);
                (
                    JobUpdate::Failed {
                        job_id: job.id.clone(),
                        error: e.job_message(),
                    },
                    JobState::Error,
                )
            }
        };

        match self.store.apply(update) {
            Ok(_) => Some(state),
            Err(e) => {
                warn!("Dropping result for job {}: {}", job.id, e);
                None
            }
        }
    }
}
