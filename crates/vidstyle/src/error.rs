use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::ArtifactKind;

#[derive(Error, Debug)]
pub enum VidstyleError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Job state error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to commit staged artifact to '{path}': {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact {kind} is missing for job {job_id}")]
    Missing { job_id: String, kind: ArtifactKind },

    #[error("Artifact {artifact} is empty")]
    Empty { artifact: String },

    #[error("Frame sequence for job {job_id} has a gap: expected frame {expected}, found {found}")]
    FrameGap {
        job_id: String,
        expected: usize,
        found: usize,
    },

    #[error("Artifact kind {0} cannot be used here")]
    WrongKind(ArtifactKind),

    #[error("Invalid artifact reference: {0}")]
    InvalidRef(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Conflict on job {job_id}: {message}")]
    Conflict { job_id: String, message: String },

    #[error("Job {0} was cancelled")]
    Cancelled(String),
}

/// Failure of an external media tool (ffmpeg, ffprobe, yt-dlp).
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected output from {program}: {message}")]
    Output { program: String, message: String },
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Stylizing frame {index} failed: {message}")]
    Stylize { index: usize, message: String },

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StageError {
    /// Taxonomy entry for this error. Store errors carry no stage of their
    /// own and take the kind of the stage that raised them.
    pub fn kind(&self, stage_kind: ErrorKind) -> ErrorKind {
        match self {
            StageError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            StageError::Fetch(_) => ErrorKind::FetchError,
            StageError::Decode(_) => ErrorKind::DecodeError,
            StageError::Stylize { .. } => ErrorKind::StylizeError,
            StageError::Encode(_) => ErrorKind::EncodeError,
            StageError::Store(_) => stage_kind,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Error taxonomy exposed to callers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidUrl,
    FetchError,
    DecodeError,
    StylizeError,
    EncodeError,
    Conflict,
    NotFound,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidUrl => "InvalidUrl",
            ErrorKind::FetchError => "FetchError",
            ErrorKind::DecodeError => "DecodeError",
            ErrorKind::StylizeError => "StylizeError",
            ErrorKind::EncodeError => "EncodeError",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Structured failure returned by every pipeline operation and recorded on
/// failed jobs.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            job_id: None,
        }
    }

    pub fn with_job(mut self, job_id: &str) -> Self {
        self.job_id = Some(job_id.to_string());
        self
    }
}

impl From<TrackerError> for Failure {
    fn from(err: TrackerError) -> Self {
        match &err {
            TrackerError::NotFound(job_id) => {
                Failure::new(ErrorKind::NotFound, err.to_string()).with_job(job_id)
            }
            TrackerError::Conflict { job_id, .. } => {
                Failure::new(ErrorKind::Conflict, err.to_string()).with_job(job_id)
            }
            TrackerError::Cancelled(job_id) => {
                Failure::new(ErrorKind::Cancelled, err.to_string()).with_job(job_id)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, VidstyleError>;
