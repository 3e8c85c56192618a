use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Failure;
use crate::job::{Job, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameCountResponse {
    pub job_id: String,
    pub frame_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StylizeResponse {
    pub job_id: String,
    pub frame_count: usize,
    /// Frames that kept their original look under the best-effort policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substituted_frames: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassembleResponse {
    pub job_id: String,
    pub download_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_ref: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for StatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            stage: job.stage,
            error: job.error.clone(),
            frame_count: job.frame_count,
            download_ref: job.download_ref.clone(),
            updated_at: job.updated_at,
        }
    }
}
