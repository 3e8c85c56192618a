use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};

use crate::error::StoreError;
use crate::storage::artifact::{
    frame_file_name, parse_frame_index, ArtifactKind, ArtifactRef, FRAME_PATTERN,
};

/// A single-file artifact being written. Nothing is visible under the final
/// name until [`StagedArtifact::commit`]; dropping it removes the temp file.
pub struct StagedArtifact {
    file: NamedTempFile,
    target: PathBuf,
    artifact: ArtifactRef,
}

impl StagedArtifact {
    pub(crate) fn new(file: NamedTempFile, target: PathBuf, artifact: ArtifactRef) -> Self {
        Self {
            file,
            target,
            artifact,
        }
    }

    /// Temp path that external tools may write to directly.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn artifact(&self) -> &ArtifactRef {
        &self.artifact
    }

    pub fn writer(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let path = self.file.path().to_path_buf();
        self.file
            .as_file_mut()
            .write_all(data)
            .and_then(|_| self.file.as_file_mut().flush())
            .map_err(|e| StoreError::WriteFile { path, source: e })
    }

    /// Validates the staged content is non-empty and renames it into place,
    /// replacing any previous version of the artifact.
    pub fn commit(self) -> Result<ArtifactRef, StoreError> {
        // Size is read from the path: tools like ffmpeg may have replaced the
        // file behind our handle.
        let size = std::fs::metadata(self.file.path())
            .map(|m| m.len())
            .map_err(|e| StoreError::ReadFile {
                path: self.file.path().to_path_buf(),
                source: e,
            })?;
        if size == 0 {
            return Err(StoreError::Empty {
                artifact: self.artifact.to_string(),
            });
        }

        let target = self.target;
        self.file.persist(&target).map_err(|e| StoreError::Commit {
            path: target.clone(),
            source: e.error,
        })?;

        Ok(self.artifact)
    }
}

/// A frame sequence being written into a hidden directory next to its final
/// location. Committing checks the sequence is non-empty and contiguous
/// from 1 before swapping it in.
pub struct StagedFrames {
    dir: TempDir,
    target: PathBuf,
    job_id: String,
    kind: ArtifactKind,
}

impl StagedFrames {
    pub(crate) fn new(dir: TempDir, target: PathBuf, job_id: &str, kind: ArtifactKind) -> Self {
        Self {
            dir,
            target,
            job_id: job_id.to_string(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Output pattern for ffmpeg (`.../frame-%06d.png`).
    pub fn sequence_pattern(&self) -> PathBuf {
        self.dir.path().join(FRAME_PATTERN)
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(frame_file_name(index))
    }

    /// Writes one frame. Safe to call from several threads for distinct
    /// indices.
    pub fn write_frame(&self, index: usize, data: &[u8]) -> Result<(), StoreError> {
        if index == 0 {
            return Err(StoreError::FrameGap {
                job_id: self.job_id.clone(),
                expected: 1,
                found: 0,
            });
        }
        let path = self.frame_path(index);
        std::fs::write(&path, data).map_err(|e| StoreError::WriteFile { path, source: e })
    }

    pub fn commit(self) -> Result<Vec<ArtifactRef>, StoreError> {
        let indices = scan_frame_indices(self.dir.path())?;
        validate_sequence(&self.job_id, self.kind, self.dir.path(), &indices)?;

        if self.target.exists() {
            std::fs::remove_dir_all(&self.target).map_err(|e| StoreError::Remove {
                path: self.target.clone(),
                source: e,
            })?;
        }

        // Once renamed, dropping the TempDir finds nothing left to delete.
        std::fs::rename(self.dir.path(), &self.target).map_err(|e| StoreError::Commit {
            path: self.target.clone(),
            source: e,
        })?;

        Ok(indices
            .into_iter()
            .map(|index| ArtifactRef::frame(&self.job_id, self.kind, index))
            .collect())
    }
}

/// Frame indices found in `dir`, sorted ascending. Files not named like
/// frames are ignored.
pub(crate) fn scan_frame_indices(dir: &Path) -> Result<Vec<usize>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::ReadFile {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut indices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::ReadFile {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if let Some(index) = entry.file_name().to_str().and_then(parse_frame_index) {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

pub(crate) fn validate_sequence(
    job_id: &str,
    kind: ArtifactKind,
    dir: &Path,
    indices: &[usize],
) -> Result<(), StoreError> {
    if indices.is_empty() {
        return Err(StoreError::Empty {
            artifact: format!("{}/{}", job_id, kind.file_name()),
        });
    }

    for (position, index) in indices.iter().enumerate() {
        let expected = position + 1;
        if *index != expected {
            return Err(StoreError::FrameGap {
                job_id: job_id.to_string(),
                expected,
                found: *index,
            });
        }

        let path = dir.join(frame_file_name(*index));
        let size = std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| StoreError::ReadFile { path, source: e })?;
        if size == 0 {
            return Err(StoreError::Empty {
                artifact: ArtifactRef::frame(job_id, kind, *index).to_string(),
            });
        }
    }

    Ok(())
}
