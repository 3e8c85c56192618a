use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

static RE_FRAME_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^frame-(\d{6,})\.png$").unwrap());

/// printf-style pattern understood by ffmpeg's image2 muxer and demuxer.
pub const FRAME_PATTERN: &str = "frame-%06d.png";

/// The kinds of artifact a job can own. Frames and StyledFrames are ordered
/// sequences stored as a directory, the rest are single files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Source,
    Frames,
    StyledFrames,
    Output,
    Manifest,
}

impl ArtifactKind {
    /// File or directory name inside the job directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Source => "source.mp4",
            ArtifactKind::Frames => "frames",
            ArtifactKind::StyledFrames => "styled",
            ArtifactKind::Output => "output.mp4",
            ArtifactKind::Manifest => "job.json",
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ArtifactKind::Frames | ArtifactKind::StyledFrames)
    }

    /// Suffix for staged temp files, so external tools can infer the format.
    pub(crate) fn staged_suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Source | ArtifactKind::Output => ".mp4",
            ArtifactKind::Manifest => ".json",
            ArtifactKind::Frames | ArtifactKind::StyledFrames => "",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactKind::Source => "Source",
            ArtifactKind::Frames => "Frames",
            ArtifactKind::StyledFrames => "StyledFrames",
            ArtifactKind::Output => "Output",
            ArtifactKind::Manifest => "Manifest",
        };
        f.write_str(name)
    }
}

/// Job-relative key of a stored artifact, e.g. `abc123/output.mp4` or
/// `abc123/frames/frame-000001.png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub(crate) fn single(job_id: &str, kind: ArtifactKind) -> Self {
        Self(format!("{}/{}", job_id, kind.file_name()))
    }

    pub(crate) fn frame(job_id: &str, kind: ArtifactKind, index: usize) -> Self {
        Self(format!(
            "{}/{}/{}",
            job_id,
            kind.file_name(),
            frame_file_name(index)
        ))
    }

    /// Parses a caller-supplied reference. Rejects absolute paths, parent
    /// components and anything that does not start with a valid job id.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidRef(raw.to_string());

        if raw.is_empty() || raw.starts_with('/') || raw.contains('\\') {
            return Err(invalid());
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() < 2 {
            return Err(invalid());
        }
        if segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(invalid());
        }
        validate_job_id(segments[0]).map_err(|_| invalid())?;

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn job_id(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// Sequence index for frame references.
    pub fn frame_index(&self) -> Option<usize> {
        self.0.rsplit('/').next().and_then(parse_frame_index)
    }

    pub(crate) fn relative_path(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn frame_file_name(index: usize) -> String {
    format!("frame-{:06}.png", index)
}

pub fn parse_frame_index(file_name: &str) -> Option<usize> {
    RE_FRAME_NAME
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .filter(|index| *index > 0)
}

/// Job ids become directory names, so only a conservative character set is
/// accepted.
pub fn validate_job_id(job_id: &str) -> Result<(), StoreError> {
    let valid = !job_id.is_empty()
        && job_id.len() <= 64
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidJobId(job_id.to_string()))
    }
}
