pub mod config;
pub mod controller;
pub mod progress;
pub mod responses;

pub use config::PipelineSettings;
pub use controller::PipelineController;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use responses::{
    DownloadResponse, FrameCountResponse, ReassembleResponse, StatusResponse, StylizeResponse,
};
