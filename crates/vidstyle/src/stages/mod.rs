//! Stage executors. Each stage reads the previous stage's artifacts from the
//! store and writes its own through staged writers.

pub mod download;
pub mod extract;
pub mod probe;
pub mod reassemble;
pub mod stylize;
pub mod tools;

use std::sync::Arc;

use image::DynamicImage;
use url::Url;

use crate::config::{Config, DownloadBackend};
use crate::error::StageError;
use crate::storage::{ArtifactRef, ArtifactStore};

pub use download::{parse_source_url, HttpDownloader, YtDlpDownloader};
pub use extract::FfmpegFrameExtractor;
pub use reassemble::FfmpegReassembler;
pub use stylize::{ColorGradeStylizer, StylizeOptions, StylizeStage, StylizedFrames};
pub use tools::ToolRunner;

/// Fetches the source video into the job's `Source` artifact.
pub trait Downloader: Send + Sync {
    fn run(&self, job_id: &str, source: &Url, store: &ArtifactStore)
        -> Result<ArtifactRef, StageError>;
}

/// Result of frame extraction.
#[derive(Debug, Clone)]
pub struct ExtractedFrames {
    pub frames: Vec<ArtifactRef>,
    /// Rate the frames should be played back at.
    pub frame_rate: f64,
}

/// Decodes the `Source` artifact into the `Frames` sequence.
pub trait FrameExtractor: Send + Sync {
    fn run(
        &self,
        job_id: &str,
        source: &ArtifactRef,
        store: &ArtifactStore,
    ) -> Result<ExtractedFrames, StageError>;
}

/// Transforms one frame. Called concurrently from several threads.
pub trait Stylizer: Send + Sync {
    fn stylize(&self, frame: DynamicImage) -> Result<DynamicImage, StageError>;
}

/// Encodes the `StyledFrames` sequence into the `Output` artifact.
pub trait Reassembler: Send + Sync {
    fn run(
        &self,
        job_id: &str,
        frames: &[ArtifactRef],
        frame_rate: f64,
        store: &ArtifactStore,
    ) -> Result<ArtifactRef, StageError>;
}

/// The set of executors a controller dispatches to.
#[derive(Clone)]
pub struct Executors {
    pub downloader: Arc<dyn Downloader>,
    pub extractor: Arc<dyn FrameExtractor>,
    pub stylizer: Arc<dyn Stylizer>,
    pub reassembler: Arc<dyn Reassembler>,
}

impl Executors {
    /// Production executors backed by reqwest or yt-dlp, ffmpeg and the
    /// color grade stylizer.
    pub fn from_config(config: &Config) -> Result<Self, StageError> {
        let downloader: Arc<dyn Downloader> = match config.download.backend {
            DownloadBackend::Http => Arc::new(HttpDownloader::new(&config.download)?),
            DownloadBackend::YtDlp => Arc::new(YtDlpDownloader::new(&config.download)),
        };

        Ok(Self {
            downloader,
            extractor: Arc::new(FfmpegFrameExtractor::new(
                &config.extract,
                config.reassemble.default_frame_rate,
            )),
            stylizer: Arc::new(ColorGradeStylizer::from_config(&config.stylize)),
            reassembler: Arc::new(FfmpegReassembler::new(&config.reassemble)),
        })
    }
}
