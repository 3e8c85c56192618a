use std::ffi::OsString;
use std::path::Path;

use tracing::info;

use crate::config::ReassembleConfig;
use crate::error::StageError;
use crate::stages::probe::count_video_frames;
use crate::stages::tools::ToolRunner;
use crate::stages::Reassembler;
use crate::storage::{ArtifactKind, ArtifactRef, ArtifactStore, FRAME_PATTERN};

/// Encodes a frame sequence into an H.264 mp4 with ffmpeg.
pub struct FfmpegReassembler {
    ffmpeg: ToolRunner,
    ffprobe: ToolRunner,
    codec: String,
    pixel_format: String,
    crf: u32,
    preset: String,
    verify_frame_count: bool,
}

impl FfmpegReassembler {
    pub fn new(config: &ReassembleConfig) -> Self {
        Self {
            ffmpeg: ToolRunner::new(&config.ffmpeg_path),
            ffprobe: ToolRunner::new(&config.ffprobe_path),
            codec: config.codec.clone(),
            pixel_format: config.pixel_format.clone(),
            crf: config.crf,
            preset: config.preset.clone(),
            verify_frame_count: config.verify_frame_count,
        }
    }

    fn build_args(&self, pattern: &Path, frame_rate: f64, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(24);
        let mut push = |arg: &str| args.push(OsString::from(arg));

        push("-hide_banner");
        push("-loglevel");
        push("error");
        push("-y");
        push("-framerate");
        push(&frame_rate.to_string());
        push("-start_number");
        push("1");
        push("-i");
        args.push(pattern.as_os_str().to_os_string());

        for (flag, value) in [
            ("-c:v", self.codec.clone()),
            ("-pix_fmt", self.pixel_format.clone()),
            ("-crf", self.crf.to_string()),
            ("-preset", self.preset.clone()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }

        args.push(output.as_os_str().to_os_string());
        args
    }
}

impl Reassembler for FfmpegReassembler {
    fn run(
        &self,
        job_id: &str,
        frames: &[ArtifactRef],
        frame_rate: f64,
        store: &ArtifactStore,
    ) -> Result<ArtifactRef, StageError> {
        let first = frames
            .first()
            .ok_or_else(|| StageError::Encode("no frames to encode".to_string()))?;
        let input_dir = store.local_path(first);
        let pattern = input_dir
            .parent()
            .map(|dir| dir.join(FRAME_PATTERN))
            .ok_or_else(|| StageError::Encode(format!("{} has no parent directory", first)))?;

        let staged = store.stage(job_id, ArtifactKind::Output)?;
        let args = self.build_args(&pattern, frame_rate, staged.path());

        self.ffmpeg
            .run(&args)
            .map_err(|e| StageError::Encode(e.to_string()))?;

        if self.verify_frame_count {
            let encoded = count_video_frames(&self.ffprobe, staged.path())
                .map_err(|e| StageError::Encode(format!("could not verify output: {}", e)))?;
            if encoded != frames.len() {
                return Err(StageError::Encode(format!(
                    "encoded {} frames, expected {}",
                    encoded,
                    frames.len()
                )));
            }
        }

        let artifact = staged.commit().map_err(|e| StageError::Encode(e.to_string()))?;
        info!(frames = frames.len(), frame_rate, "Reassembled video");
        Ok(artifact)
    }
}
