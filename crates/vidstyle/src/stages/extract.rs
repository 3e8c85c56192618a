use std::ffi::OsString;
use std::path::Path;

use tracing::{info, warn};

use crate::config::ExtractConfig;
use crate::error::{StageError, StoreError};
use crate::sanitize::redact_path;
use crate::stages::probe::probe_frame_rate;
use crate::stages::tools::ToolRunner;
use crate::stages::{ExtractedFrames, FrameExtractor};
use crate::storage::{ArtifactKind, ArtifactRef, ArtifactStore};

/// Extracts PNG frames with ffmpeg.
pub struct FfmpegFrameExtractor {
    ffmpeg: ToolRunner,
    ffprobe: ToolRunner,
    sample_fps: Option<f64>,
    quality: u32,
    fallback_frame_rate: f64,
}

impl FfmpegFrameExtractor {
    pub fn new(config: &ExtractConfig, fallback_frame_rate: f64) -> Self {
        Self {
            ffmpeg: ToolRunner::new(&config.ffmpeg_path),
            ffprobe: ToolRunner::new(&config.ffprobe_path),
            sample_fps: config.sample_fps,
            quality: config.quality,
            fallback_frame_rate,
        }
    }

    fn frame_rate(&self, input: &Path) -> f64 {
        if let Some(fps) = self.sample_fps {
            return fps;
        }
        match probe_frame_rate(&self.ffprobe, input) {
            Ok(rate) => rate,
            Err(e) => {
                warn!(
                    "Could not probe frame rate of {}, using {}: {}",
                    redact_path(input),
                    self.fallback_frame_rate,
                    e
                );
                self.fallback_frame_rate
            }
        }
    }

    fn build_args(&self, input: &Path, pattern: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_os_string());

        if let Some(fps) = self.sample_fps {
            args.push("-vf".into());
            args.push(format!("fps={}", fps).into());
        }

        args.push("-vsync".into());
        args.push("0".into());
        args.push("-q:v".into());
        args.push(self.quality.to_string().into());
        args.push("-start_number".into());
        args.push("1".into());
        args.push(pattern.as_os_str().to_os_string());
        args
    }
}

impl FrameExtractor for FfmpegFrameExtractor {
    fn run(
        &self,
        job_id: &str,
        source: &ArtifactRef,
        store: &ArtifactStore,
    ) -> Result<ExtractedFrames, StageError> {
        let input = store.local_path(source);
        let frame_rate = self.frame_rate(&input);

        let staged = store.stage_frames(job_id, ArtifactKind::Frames)?;
        let args = self.build_args(&input, &staged.sequence_pattern());

        self.ffmpeg
            .run(&args)
            .map_err(|e| StageError::Decode(e.to_string()))?;

        let frames = staged.commit().map_err(|e| match e {
            StoreError::Empty { .. } => {
                StageError::Decode("no frames could be decoded from the source".to_string())
            }
            other => StageError::Store(other),
        })?;

        info!(frames = frames.len(), frame_rate, "Extracted frames");
        Ok(ExtractedFrames { frames, frame_rate })
    }
}
