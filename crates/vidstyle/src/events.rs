//! Job event broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Failure;
use crate::job::{Job, Operation, Stage};

/// Status of the operation an event describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// Frames processed so far by a running stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameProgress {
    pub done: usize,
    pub total: usize,
}

/// Event published on every job state change and during stylization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    /// Stage of the job when the event was emitted.
    pub stage: Stage,
    pub status: JobStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Failure detail (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<FrameProgress>,
}

impl JobEvent {
    pub fn started(job_id: &str, operation: Operation, stage: Stage) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: Some(operation),
            stage,
            status: JobStatus::Running,
            message: format!("Running {}", operation),
            timestamp: Utc::now(),
            error: None,
            progress: None,
        }
    }

    pub fn frames(
        job_id: &str,
        operation: Operation,
        stage: Stage,
        done: usize,
        total: usize,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: Some(operation),
            stage,
            status: JobStatus::Running,
            message: format!("Processed {}/{} frames", done, total),
            timestamp: Utc::now(),
            error: None,
            progress: Some(FrameProgress { done, total }),
        }
    }

    /// State change that is not a failure.
    pub fn completed(job: &Job, operation: Option<Operation>) -> Self {
        Self {
            job_id: job.job_id.clone(),
            operation,
            stage: job.stage,
            status: JobStatus::Completed,
            message: format!("Job is {}", job.stage),
            timestamp: Utc::now(),
            error: None,
            progress: None,
        }
    }

    pub fn failed(job: &Job, operation: Option<Operation>) -> Self {
        let message = job
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Job failed".to_string());
        Self {
            job_id: job.job_id.clone(),
            operation,
            stage: job.stage,
            status: JobStatus::Failed,
            message,
            timestamp: Utc::now(),
            error: job.error.clone(),
            progress: None,
        }
    }
}

/// Broadcasts job events to any number of subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
