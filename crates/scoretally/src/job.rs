use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::images::ImageRef;

/// Lifecycle state of a job. Transitions only move forward:
/// `Pending -> Processing -> Success | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Success,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Error)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Processing, JobState::Success)
                | (JobState::Processing, JobState::Error)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Success => write!(f, "success"),
            JobState::Error => write!(f, "error"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: String,
    pub from: JobState,
    pub to: JobState,
}

/// One row of data found within a single screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Player or account name; "Unknown" when unreadable.
    pub account: String,
    /// Timestamp as returned by the gateway. Normalized at report time.
    pub time: String,
    /// Non-negative score; 0 when unreadable.
    pub score: f64,
}

impl ExtractedRecord {
    pub fn new(account: impl Into<String>, time: impl Into<String>, score: f64) -> Self {
        Self {
            account: account.into(),
            time: time.into(),
            score,
        }
    }
}

/// A file handed in by the user, before it becomes a job.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    /// MIME type reported by the source, if any. Directory uploads often lack one.
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        self.mime_type = if mime_type.is_empty() {
            None
        } else {
            Some(mime_type)
        };
        self
    }
}

/// One submitted image and its extraction lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    /// Original file name, used as the display label.
    pub source_name: String,
    pub image: ImageRef,
    pub state: JobState,
    /// Populated together with the transition to `Success`.
    pub records: Vec<ExtractedRecord>,
    /// Present only in the `Error` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Job {
    pub fn new(source_name: impl Into<String>, image: ImageRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_name: source_name.into(),
            image,
            state: JobState::Pending,
            records: Vec::new(),
            error_detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, to: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError {
                job_id: self.id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Processing)
    }

    pub fn succeed(&mut self, records: Vec<ExtractedRecord>) -> Result<(), TransitionError> {
        self.transition(JobState::Success)?;
        self.records = records;
        Ok(())
    }

    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobState::Error)?;
        self.error_detail = Some(detail.into());
        Ok(())
    }
}
