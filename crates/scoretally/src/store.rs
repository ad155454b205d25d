//! Versioned job store with a single mutation entry point.
//!
//! Every state transition goes through [`JobStore::apply`], which updates the
//! job and the progress counters under one write lock and then broadcasts a
//! [`StoreEvent`]. Readers take full snapshots, so nobody ever sees a job with
//! a new state but without its records.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::job::{ExtractedRecord, Job, JobState, TransitionError};
use crate::scheduler::BatchSummary;

/// `{total, completed}` counters for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
}

impl Progress {
    /// Completed fraction, clamped to `[0.0, 1.0]`.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

/// One mutation of the job collection.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Submitted {
        batch_id: String,
        jobs: Vec<Job>,
    },
    Started {
        job_id: String,
    },
    Succeeded {
        job_id: String,
        records: Vec<ExtractedRecord>,
    },
    Failed {
        job_id: String,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    #[serde(rename_all = "camelCase")]
    JobsSubmitted {
        version: u64,
        batch_id: String,
        job_ids: Vec<String>,
        progress: Progress,
    },
    #[serde(rename_all = "camelCase")]
    JobUpdated {
        version: u64,
        job_id: String,
        source_name: String,
        state: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        progress: Progress,
    },
    #[serde(rename_all = "camelCase")]
    BatchCompleted { summary: BatchSummary },
    #[serde(rename_all = "camelCase")]
    Cleared { version: u64, discarded: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown job {0}")]
    UnknownJob(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Consistent copy of the store at one version.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub version: u64,
    pub jobs: Vec<Job>,
    pub progress: Progress,
}

#[derive(Default)]
struct StoreState {
    version: u64,
    jobs: Vec<Job>,
    progress: Progress,
}

impl StoreState {
    fn job_mut(&mut self, job_id: &str) -> Result<&mut Job, StoreError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| StoreError::UnknownJob(job_id.to_string()))
    }
}

pub struct JobStore {
    state: RwLock<StoreState>,
    sender: broadcast::Sender<StoreEvent>,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: RwLock::new(StoreState::default()),
            sender,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        match self.state.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn send(&self, event: StoreEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Applies one mutation atomically and returns the new version.
    pub fn apply(&self, update: JobUpdate) -> Result<u64, StoreError> {
        let mut state = self.write_state();

        let event = match update {
            JobUpdate::Submitted { batch_id, jobs } => {
                let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
                state.progress.total += jobs.len();
                state.jobs.extend(jobs);
                state.version += 1;
                debug!("Batch {} submitted {} jobs", batch_id, job_ids.len());
                StoreEvent::JobsSubmitted {
                    version: state.version,
                    batch_id,
                    job_ids,
                    progress: state.progress,
                }
            }
            JobUpdate::Started { job_id } => {
                let job = state.job_mut(&job_id)?;
                job.start()?;
                let source_name = job.source_name.clone();
                state.version += 1;
                StoreEvent::JobUpdated {
                    version: state.version,
                    job_id,
                    source_name,
                    state: JobState::Processing,
                    error: None,
                    progress: state.progress,
                }
            }
            JobUpdate::Succeeded { job_id, records } => {
                let job = state.job_mut(&job_id)?;
                job.succeed(records)?;
                let source_name = job.source_name.clone();
                state.progress.completed += 1;
                state.version += 1;
                StoreEvent::JobUpdated {
                    version: state.version,
                    job_id,
                    source_name,
                    state: JobState::Success,
                    error: None,
                    progress: state.progress,
                }
            }
            JobUpdate::Failed { job_id, error } => {
                let job = state.job_mut(&job_id)?;
                job.fail(error.clone())?;
                let source_name = job.source_name.clone();
                state.progress.completed += 1;
                state.version += 1;
                StoreEvent::JobUpdated {
                    version: state.version,
                    job_id,
                    source_name,
                    state: JobState::Error,
                    error: Some(error),
                    progress: state.progress,
                }
            }
        };

        let version = state.version;
        self.send(event);
        Ok(version)
    }

    /// Removes every job and resets progress. The caller owns the returned
    /// jobs and must release their images.
    pub fn clear(&self) -> Vec<Job> {
        let mut state = self.write_state();
        let jobs = std::mem::take(&mut state.jobs);
        state.progress = Progress::default();
        state.version += 1;
        self.send(StoreEvent::Cleared {
            version: state.version,
            discarded: jobs.len(),
        });
        jobs
    }

    pub fn notify_batch_completed(&self, summary: BatchSummary) {
        self.send(StoreEvent::BatchCompleted { summary });
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.read_state();
        StoreSnapshot {
            version: state.version,
            jobs: state.jobs.clone(),
            progress: state.progress,
        }
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.read_state().jobs.iter().find(|j| j.id == job_id).cloned()
    }

    pub fn progress(&self) -> Progress {
        self.read_state().progress
    }

    pub fn version(&self) -> u64 {
        self.read_state().version
    }

    pub fn len(&self) -> usize {
        self.read_state().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(256)
    }
}
