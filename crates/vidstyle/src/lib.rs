pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod stages;
pub mod storage;
pub mod worker;

pub use config::{load_config, load_config_from_str, Config};
pub use error::{
    ConfigError, ErrorKind, Failure, Result, StageError, StoreError, TrackerError, VidstyleError,
    WorkerError,
};
pub use events::{JobEvent, JobEventBroadcaster, JobStatus};
pub use job::{Job, JobTracker, Operation, Stage};
pub use pipeline::{PipelineController, PipelineSettings};
pub use stages::Executors;
pub use storage::{ArtifactKind, ArtifactRef, ArtifactStore};
pub use worker::{StageOutcome, StageRequest, StageResponse, WorkerPool};
