use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::storage::artifact::{validate_job_id, ArtifactKind, ArtifactRef, FRAME_PATTERN};
use crate::storage::staging::{scan_frame_indices, validate_sequence, StagedArtifact, StagedFrames};

const STAGED_PREFIX: &str = ".staged-";

/// Per-job artifact storage rooted at the work directory. Every job owns one
/// directory named after its id; artifacts live at fixed names inside it.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn init(&self) -> Result<(), StoreError> {
        ensure_directory(&self.root)
    }

    fn job_dir(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        validate_job_id(job_id)?;
        Ok(self.root.join(job_id))
    }

    fn artifact_path(&self, job_id: &str, kind: ArtifactKind) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(job_id)?.join(kind.file_name()))
    }

    /// Writes a single-file artifact atomically.
    pub fn put(
        &self,
        job_id: &str,
        kind: ArtifactKind,
        data: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        let mut staged = self.stage(job_id, kind)?;
        staged.write_all(data)?;
        staged.commit()
    }

    pub fn stage(&self, job_id: &str, kind: ArtifactKind) -> Result<StagedArtifact, StoreError> {
        if kind.is_sequence() {
            return Err(StoreError::WrongKind(kind));
        }
        let job_dir = self.job_dir(job_id)?;
        ensure_directory(&job_dir)?;

        let file = tempfile::Builder::new()
            .prefix(STAGED_PREFIX)
            .suffix(kind.staged_suffix())
            .tempfile_in(&job_dir)
            .map_err(|e| StoreError::WriteFile {
                path: job_dir.clone(),
                source: e,
            })?;

        Ok(StagedArtifact::new(
            file,
            job_dir.join(kind.file_name()),
            ArtifactRef::single(job_id, kind),
        ))
    }

    pub fn stage_frames(
        &self,
        job_id: &str,
        kind: ArtifactKind,
    ) -> Result<StagedFrames, StoreError> {
        if !kind.is_sequence() {
            return Err(StoreError::WrongKind(kind));
        }
        let job_dir = self.job_dir(job_id)?;
        ensure_directory(&job_dir)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-", STAGED_PREFIX, kind.file_name()))
            .tempdir_in(&job_dir)
            .map_err(|e| StoreError::CreateDirectory {
                path: job_dir.clone(),
                source: e,
            })?;

        Ok(StagedFrames::new(
            dir,
            job_dir.join(kind.file_name()),
            job_id,
            kind,
        ))
    }

    pub fn get(&self, job_id: &str, kind: ArtifactKind) -> Result<Vec<u8>, StoreError> {
        let artifact = self.require(job_id, kind)?;
        self.read(&artifact)
    }

    /// Reference to an existing, non-empty single-file artifact.
    pub fn require(&self, job_id: &str, kind: ArtifactKind) -> Result<ArtifactRef, StoreError> {
        if kind.is_sequence() {
            return Err(StoreError::WrongKind(kind));
        }
        let path = self.artifact_path(job_id, kind)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(ArtifactRef::single(job_id, kind)),
            Ok(meta) if meta.is_file() => Err(StoreError::Empty {
                artifact: ArtifactRef::single(job_id, kind).to_string(),
            }),
            _ => Err(StoreError::Missing {
                job_id: job_id.to_string(),
                kind,
            }),
        }
    }

    pub fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let path = self.local_path(artifact);
        std::fs::read(&path).map_err(|e| self.read_error(artifact, path, e))
    }

    pub fn open(&self, artifact: &ArtifactRef) -> Result<File, StoreError> {
        let path = self.local_path(artifact);
        File::open(&path).map_err(|e| self.read_error(artifact, path, e))
    }

    fn read_error(&self, artifact: &ArtifactRef, path: PathBuf, e: std::io::Error) -> StoreError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::InvalidRef(format!("{} does not exist", artifact))
        } else {
            StoreError::ReadFile { path, source: e }
        }
    }

    /// Filesystem location of an artifact, for handing to external tools.
    pub fn local_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root.join(artifact.relative_path())
    }

    pub fn exists(&self, job_id: &str, kind: ArtifactKind) -> bool {
        match self.artifact_path(job_id, kind) {
            Ok(path) if kind.is_sequence() => path.is_dir(),
            Ok(path) => path.is_file(),
            Err(_) => false,
        }
    }

    /// Frames of a committed sequence, ordered by their parsed index.
    pub fn list_frames(
        &self,
        job_id: &str,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactRef>, StoreError> {
        if !kind.is_sequence() {
            return Err(StoreError::WrongKind(kind));
        }
        let dir = self.artifact_path(job_id, kind)?;
        if !dir.is_dir() {
            return Err(StoreError::Missing {
                job_id: job_id.to_string(),
                kind,
            });
        }

        let indices = scan_frame_indices(&dir)?;
        validate_sequence(job_id, kind, &dir, &indices)?;

        Ok(indices
            .into_iter()
            .map(|index| ArtifactRef::frame(job_id, kind, index))
            .collect())
    }

    /// ffmpeg input pattern for a committed sequence.
    pub fn sequence_pattern(
        &self,
        job_id: &str,
        kind: ArtifactKind,
    ) -> Result<PathBuf, StoreError> {
        if !kind.is_sequence() {
            return Err(StoreError::WrongKind(kind));
        }
        Ok(self.artifact_path(job_id, kind)?.join(FRAME_PATTERN))
    }

    pub fn remove_job(&self, job_id: &str) -> Result<(), StoreError> {
        let dir = self.job_dir(job_id)?;
        if !dir.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&dir).map_err(|e| StoreError::Remove {
            path: dir.clone(),
            source: e,
        })
    }

    /// Deletes staged files and directories an interrupted stage left in the
    /// job directory. Returns how many entries were removed.
    pub fn remove_staged(&self, job_id: &str) -> Result<usize, StoreError> {
        let dir = self.job_dir(job_id)?;
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StoreError::ReadFile {
                path: dir.clone(),
                source: e.into(),
            })?;
            let is_staged = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(STAGED_PREFIX));
            if !is_staged {
                continue;
            }

            let path = entry.path();
            let result = if entry.file_type().is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            result.map_err(|e| StoreError::Remove {
                path: path.to_path_buf(),
                source: e,
            })?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Ids of every job directory under the root.
    pub fn job_ids(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StoreError::ReadFile {
                path: self.root.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_job_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Latest modification time of anything inside the job directory.
    pub fn modified_at(&self, job_id: &str) -> Result<DateTime<Utc>, StoreError> {
        let dir = self.job_dir(job_id)?;
        let mut latest = None;

        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| StoreError::ReadFile {
                path: dir.clone(),
                source: e.into(),
            })?;
            let modified = entry
                .metadata()
                .map_err(|e| StoreError::ReadFile {
                    path: entry.path().to_path_buf(),
                    source: e.into(),
                })?
                .modified()
                .map_err(|e| StoreError::ReadFile {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
            let modified: DateTime<Utc> = modified.into();
            if latest.map_or(true, |l| modified > l) {
                latest = Some(modified);
            }
        }

        latest.ok_or_else(|| StoreError::Missing {
            job_id: job_id.to_string(),
            kind: ArtifactKind::Manifest,
        })
    }
}

fn ensure_directory(path: &Path) -> Result<(), StoreError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StoreError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
