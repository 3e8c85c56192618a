use serde::{Deserialize, Serialize};

use crate::error::Failure;
use crate::pipeline::{
    DownloadResponse, FrameCountResponse, PipelineController, ReassembleResponse, StylizeResponse,
};

/// A pipeline operation queued on the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageRequest {
    Download { source_url: String },
    Redownload { job_id: String },
    ExtractFrames { job_id: String },
    StylizeFrames { job_id: String },
    Reassemble { job_id: String },
    /// All four stages for a new job.
    Process { source_url: String },
}

impl StageRequest {
    /// Job the request targets, when it already exists.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            StageRequest::Download { .. } | StageRequest::Process { .. } => None,
            StageRequest::Redownload { job_id }
            | StageRequest::ExtractFrames { job_id }
            | StageRequest::StylizeFrames { job_id }
            | StageRequest::Reassemble { job_id } => Some(job_id),
        }
    }

    pub fn execute(&self, controller: &PipelineController) -> Result<StageResponse, Failure> {
        match self {
            StageRequest::Download { source_url } => {
                controller.download(source_url).map(StageResponse::Download)
            }
            StageRequest::Redownload { job_id } => {
                controller.redownload(job_id).map(StageResponse::Download)
            }
            StageRequest::ExtractFrames { job_id } => {
                controller.extract_frames(job_id).map(StageResponse::Frames)
            }
            StageRequest::StylizeFrames { job_id } => {
                controller.stylize_frames(job_id).map(StageResponse::Stylized)
            }
            StageRequest::Reassemble { job_id } => {
                controller.reassemble(job_id).map(StageResponse::Reassembled)
            }
            StageRequest::Process { source_url } => {
                controller.process(source_url).map(StageResponse::Reassembled)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageResponse {
    Download(DownloadResponse),
    Frames(FrameCountResponse),
    Stylized(StylizeResponse),
    Reassembled(ReassembleResponse),
}

impl StageResponse {
    pub fn job_id(&self) -> &str {
        match self {
            StageResponse::Download(r) => &r.job_id,
            StageResponse::Frames(r) => &r.job_id,
            StageResponse::Stylized(r) => &r.job_id,
            StageResponse::Reassembled(r) => &r.job_id,
        }
    }
}

/// Result of one request, sent back through the pool's result channel.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub request: StageRequest,
    pub result: Result<StageResponse, Failure>,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
