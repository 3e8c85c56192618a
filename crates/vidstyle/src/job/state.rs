use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Failure};

/// Position of a job in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Created,
    Downloaded,
    FramesExtracted,
    Stylized,
    Reassembled,
    Failed,
}

impl Stage {
    /// Whether `self -> to` is an edge of the job state machine. Any
    /// non-failed stage may fail; otherwise stages only advance by one.
    pub fn can_transition_to(self, to: Stage) -> bool {
        match (self, to) {
            (Stage::Failed, _) => false,
            (_, Stage::Failed) => true,
            (Stage::Created, Stage::Downloaded)
            | (Stage::Downloaded, Stage::FramesExtracted)
            | (Stage::FramesExtracted, Stage::Stylized)
            | (Stage::Stylized, Stage::Reassembled) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Reassembled | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Created => "Created",
            Stage::Downloaded => "Downloaded",
            Stage::FramesExtracted => "FramesExtracted",
            Stage::Stylized => "Stylized",
            Stage::Reassembled => "Reassembled",
            Stage::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// The four stage operations a caller can run against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Download,
    ExtractFrames,
    StylizeFrames,
    Reassemble,
}

impl Operation {
    pub fn required_stage(self) -> Stage {
        match self {
            Operation::Download => Stage::Created,
            Operation::ExtractFrames => Stage::Downloaded,
            Operation::StylizeFrames => Stage::FramesExtracted,
            Operation::Reassemble => Stage::Stylized,
        }
    }

    pub fn target_stage(self) -> Stage {
        match self {
            Operation::Download => Stage::Downloaded,
            Operation::ExtractFrames => Stage::FramesExtracted,
            Operation::StylizeFrames => Stage::Stylized,
            Operation::Reassemble => Stage::Reassembled,
        }
    }

    /// Kind recorded when this operation fails for a reason that is not
    /// already classified, such as a storage error.
    pub fn failure_kind(self) -> ErrorKind {
        match self {
            Operation::Download => ErrorKind::FetchError,
            Operation::ExtractFrames => ErrorKind::DecodeError,
            Operation::StylizeFrames => ErrorKind::StylizeError,
            Operation::Reassemble => ErrorKind::EncodeError,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Download => "download",
            Operation::ExtractFrames => "extract_frames",
            Operation::StylizeFrames => "stylize_frames",
            Operation::Reassemble => "reassemble",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Tracked state of one video stylization request. Also the on-disk manifest
/// format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub source_url: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    /// Stage the job was in when the failing operation started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_from: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substituted_frames: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(job_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            source_url: source_url.into(),
            stage: Stage::Created,
            error: None,
            failed_from: None,
            frame_count: None,
            frame_rate: None,
            substituted_frames: Vec::new(),
            download_ref: None,
            created_at: now,
            updated_at: now,
            cancel_requested: false,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_failed(&mut self, failure: Failure) {
        self.failed_from = Some(self.stage);
        self.stage = Stage::Failed;
        self.error = Some(failure.with_job(&self.job_id));
        self.touch();
    }

    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }
}
