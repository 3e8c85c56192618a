use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use crate::config::Config;
use crate::error::{ErrorKind, Failure, StageError, TrackerError, VidstyleError};
use crate::events::{JobEvent, JobEventBroadcaster};
use crate::job::{Job, JobTracker, Operation, Stage};
use crate::sanitize::redact_url;
use crate::stages::{parse_source_url, Executors, StylizeStage};
use crate::storage::{ArtifactKind, ArtifactRef, ArtifactStore};

use super::config::PipelineSettings;
use super::progress::{BroadcastProgress, ProgressEvent, ProgressReporter};
use super::responses::{
    DownloadResponse, FrameCountResponse, ReassembleResponse, StatusResponse, StylizeResponse,
};

/// Drives jobs through download, frame extraction, stylization and
/// reassembly. The tracker decides whether an operation may run; the
/// controller runs the executor and records the outcome.
pub struct PipelineController {
    settings: PipelineSettings,
    tracker: Arc<JobTracker>,
    store: Arc<ArtifactStore>,
    executors: Executors,
    stylize: StylizeStage,
    events: JobEventBroadcaster,
    progress: Arc<dyn ProgressReporter>,
    /// Serializes manifest writes per job.
    manifest_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PipelineController {
    /// Production constructor. Creates the work directory and wires the
    /// executors selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self, VidstyleError> {
        let settings = PipelineSettings::from_config(config);
        let store = ArtifactStore::new(&settings.work_directory);
        store.init()?;
        let executors = Executors::from_config(config)?;

        Ok(Self::new(
            settings,
            Arc::new(JobTracker::new()),
            Arc::new(store),
            executors,
        ))
    }

    pub fn new(
        settings: PipelineSettings,
        tracker: Arc<JobTracker>,
        store: Arc<ArtifactStore>,
        executors: Executors,
    ) -> Self {
        let events = JobEventBroadcaster::new(settings.event_capacity);
        let stylize = StylizeStage::new(Arc::clone(&executors.stylizer), settings.stylize);
        let progress: Arc<dyn ProgressReporter> = Arc::new(BroadcastProgress::new(events.clone()));

        Self {
            settings,
            tracker,
            store,
            executors,
            stylize,
            events,
            progress,
            manifest_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the event reporter. Subscribers obtained through
    /// [`PipelineController::subscribe`] only see events if the new reporter
    /// forwards to them.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Validates `source_url`, registers a job and fetches the source video.
    /// A malformed URL is rejected before any job exists.
    pub fn download(&self, source_url: &str) -> Result<DownloadResponse, Failure> {
        let _span = info_span!("download", source = %redact_url(source_url)).entered();

        let url = parse_source_url(source_url, &self.settings.allowed_schemes)
            .map_err(|e| Failure::new(ErrorKind::InvalidUrl, e.to_string()))?;

        let job_id = self.tracker.create_job(url.as_str());
        info!(job_id = %job_id, "Created job");
        if let Ok(job) = self.tracker.get_state(&job_id) {
            self.record(&job, None);
        }

        self.run_download(&job_id)
    }

    /// Downloads again for an existing job that is back in `Created`, such
    /// as after a failed download was retried.
    pub fn redownload(&self, job_id: &str) -> Result<DownloadResponse, Failure> {
        self.run_download(job_id)
    }

    fn run_download(&self, job_id: &str) -> Result<DownloadResponse, Failure> {
        self.run_stage(
            job_id,
            Operation::Download,
            |job| {
                let url = parse_source_url(&job.source_url, &self.settings.allowed_schemes)?;
                self.executors.downloader.run(job_id, &url, &self.store)?;
                Ok(self.store.require(job_id, ArtifactKind::Source)?)
            },
            |_, _| {},
        )?;

        Ok(DownloadResponse {
            job_id: job_id.to_string(),
        })
    }

    pub fn extract_frames(&self, job_id: &str) -> Result<FrameCountResponse, Failure> {
        let (job, _) = self.run_stage(
            job_id,
            Operation::ExtractFrames,
            |_| {
                let source = self.store.require(job_id, ArtifactKind::Source)?;
                let extracted = self.executors.extractor.run(job_id, &source, &self.store)?;

                let committed = self.store.list_frames(job_id, ArtifactKind::Frames)?;
                if committed.len() != extracted.frames.len() {
                    return Err(StageError::Decode(format!(
                        "extractor reported {} frames, store holds {}",
                        extracted.frames.len(),
                        committed.len()
                    )));
                }
                Ok(extracted)
            },
            |job, extracted| {
                job.frame_count = Some(extracted.frames.len());
                job.frame_rate = Some(extracted.frame_rate);
                job.substituted_frames.clear();
            },
        )?;

        Ok(FrameCountResponse {
            job_id: job.job_id,
            frame_count: job.frame_count.unwrap_or_default(),
        })
    }

    pub fn stylize_frames(&self, job_id: &str) -> Result<StylizeResponse, Failure> {
        let (job, _) = self.run_stage(
            job_id,
            Operation::StylizeFrames,
            |job| {
                let frames = self.store.list_frames(job_id, ArtifactKind::Frames)?;
                let stage = job.stage;
                let on_progress = |done: usize, total: usize| {
                    self.progress.report(ProgressEvent::Frames {
                        job_id: job_id.to_string(),
                        operation: Operation::StylizeFrames,
                        stage,
                        done,
                        total,
                    });
                };
                let styled = self.stylize.run(job_id, &frames, &self.store, &on_progress)?;

                let committed = self.store.list_frames(job_id, ArtifactKind::StyledFrames)?;
                if committed.len() != frames.len() {
                    return Err(StageError::Stylize {
                        index: committed.len() + 1,
                        message: format!(
                            "expected {} styled frames, store holds {}",
                            frames.len(),
                            committed.len()
                        ),
                    });
                }
                Ok(styled)
            },
            |job, styled| {
                job.frame_count = Some(styled.frames.len());
                job.substituted_frames = styled.substituted.clone();
            },
        )?;

        Ok(StylizeResponse {
            job_id: job.job_id,
            frame_count: job.frame_count.unwrap_or_default(),
            substituted_frames: job.substituted_frames,
        })
    }

    pub fn reassemble(&self, job_id: &str) -> Result<ReassembleResponse, Failure> {
        let (_, output) = self.run_stage(
            job_id,
            Operation::Reassemble,
            |job| {
                let frames = self.store.list_frames(job_id, ArtifactKind::StyledFrames)?;
                let frame_rate = job.frame_rate.unwrap_or(self.settings.default_frame_rate);
                self.executors
                    .reassembler
                    .run(job_id, &frames, frame_rate, &self.store)?;
                Ok(self.store.require(job_id, ArtifactKind::Output)?)
            },
            |job, output| {
                job.download_ref = Some(output.to_string());
            },
        )?;

        Ok(ReassembleResponse {
            job_id: job_id.to_string(),
            download_ref: output.to_string(),
        })
    }

    /// Runs all four stages for a new job.
    pub fn process(&self, source_url: &str) -> Result<ReassembleResponse, Failure> {
        let DownloadResponse { job_id } = self.download(source_url)?;
        self.extract_frames(&job_id)?;
        self.stylize_frames(&job_id)?;
        self.reassemble(&job_id)
    }

    pub fn status(&self, job_id: &str) -> Result<StatusResponse, Failure> {
        let job = self.tracker.get_state(job_id)?;
        Ok(StatusResponse::from(&job))
    }

    pub fn list_jobs(&self) -> Vec<StatusResponse> {
        self.tracker.list().iter().map(StatusResponse::from).collect()
    }

    /// Returns a failed job to the stage its failing operation started from.
    pub fn retry(&self, job_id: &str) -> Result<StatusResponse, Failure> {
        let job = self.tracker.retry(job_id)?;
        info!(job_id, stage = %job.stage, "Job reset for retry");
        self.record(&job, None);
        Ok(StatusResponse::from(&job))
    }

    pub fn cancel(&self, job_id: &str) -> Result<StatusResponse, Failure> {
        let job = self.tracker.cancel(job_id)?;
        if job.is_failed() {
            info!(job_id, "Job cancelled");
        } else {
            info!(job_id, "Cancellation requested, job stops at the next stage");
        }
        self.record(&job, None);
        Ok(StatusResponse::from(&job))
    }

    /// Opens the final video behind a `downloadRef`. Only finished jobs
    /// expose their output.
    pub fn open_output(&self, download_ref: &str) -> Result<File, Failure> {
        let artifact = ArtifactRef::parse(download_ref)
            .map_err(|e| Failure::new(ErrorKind::NotFound, e.to_string()))?;
        let job_id = artifact.job_id();
        let job = self.tracker.get_state(job_id)?;

        if job.stage != Stage::Reassembled {
            return Err(Failure::new(
                ErrorKind::Conflict,
                format!("job {} is {}, output is not available", job_id, job.stage),
            )
            .with_job(job_id));
        }
        if job.download_ref.as_deref() != Some(artifact.as_str()) {
            return Err(Failure::new(
                ErrorKind::NotFound,
                format!("{} is not the output of job {}", artifact, job_id),
            )
            .with_job(job_id));
        }

        self.store
            .open(&artifact)
            .map_err(|e| Failure::new(ErrorKind::NotFound, e.to_string()).with_job(job_id))
    }

    /// Loads persisted manifests from the work directory into the tracker.
    /// Returns how many jobs were restored.
    pub fn recover(&self) -> Result<usize, VidstyleError> {
        let mut restored = 0;

        for job_id in self.store.job_ids()? {
            if !self.store.exists(&job_id, ArtifactKind::Manifest) {
                debug!(job_id = %job_id, "No manifest, skipping");
                continue;
            }
            let data = self.store.get(&job_id, ArtifactKind::Manifest)?;
            let job: Job = match serde_json::from_slice(&data) {
                Ok(job) => job,
                Err(e) => {
                    warn!(job_id = %job_id, "Unreadable manifest: {}", e);
                    continue;
                }
            };
            if job.job_id != job_id {
                warn!(
                    job_id = %job_id,
                    manifest_id = %job.job_id,
                    "Manifest does not belong to its directory, skipping"
                );
                continue;
            }
            if self.tracker.restore(job) {
                // Nothing runs for a freshly restored job, so any staged
                // entry is a leftover from an interrupted stage.
                match self.store.remove_staged(&job_id) {
                    Ok(0) => {}
                    Ok(count) => info!(job_id = %job_id, count, "Removed leftover staged files"),
                    Err(e) => warn!(job_id = %job_id, "Failed to remove staged files: {}", e),
                }
                restored += 1;
            }
        }

        info!(restored, "Recovered jobs from work directory");
        Ok(restored)
    }

    /// Removes jobs whose directory has not changed for longer than the
    /// retention window. Returns the removed job ids.
    pub fn sweep_expired(&self) -> Result<Vec<String>, VidstyleError> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<String>, VidstyleError> {
        let hours = self.settings.max_age_hours.min(i32::MAX as u64) as i64;
        let cutoff = now - Duration::hours(hours);
        let mut removed = Vec::new();

        for job_id in self.store.job_ids()? {
            if self.tracker.is_active(&job_id) {
                continue;
            }
            if self.store.modified_at(&job_id)? > cutoff {
                continue;
            }

            let lock = self.manifest_lock(&job_id);
            let _manifest = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match self.tracker.remove(&job_id) {
                Ok(_) | Err(TrackerError::NotFound(_)) => {}
                Err(e) => {
                    debug!(job_id = %job_id, "Not sweeping: {}", e);
                    continue;
                }
            }
            self.store.remove_job(&job_id)?;
            self.forget_manifest_lock(&job_id);
            info!(job_id = %job_id, "Removed expired job");
            removed.push(job_id);
        }

        Ok(removed)
    }

    /// Claims the job for `op`, runs `work` and finalizes the claim. `update`
    /// applies the work's output to the job in the same step that advances
    /// its stage.
    fn run_stage<T>(
        &self,
        job_id: &str,
        op: Operation,
        work: impl FnOnce(&Job) -> Result<T, StageError>,
        update: impl FnOnce(&mut Job, &T),
    ) -> Result<(Job, T), Failure> {
        let _span = info_span!("stage", job_id = %job_id, operation = %op).entered();

        let lease = match self.tracker.begin(job_id, op) {
            Ok(lease) => lease,
            Err(err @ TrackerError::Cancelled(_)) => {
                info!("Job cancelled before {}", op);
                if let Ok(job) = self.tracker.get_state(job_id) {
                    self.record(&job, Some(op));
                }
                return Err(err.into());
            }
            Err(err) => {
                debug!("Rejected: {}", err);
                return Err(err.into());
            }
        };

        let snapshot = lease.job();
        self.progress.report(ProgressEvent::Started {
            job_id: job_id.to_string(),
            operation: op,
            stage: snapshot.stage,
        });

        match work(&snapshot) {
            Ok(output) => {
                let job = lease.complete_with(|job| update(job, &output));
                info!(stage = %job.stage, "Stage completed");
                self.record(&job, Some(op));
                Ok((job, output))
            }
            Err(err) => {
                let failure =
                    Failure::new(err.kind(op.failure_kind()), err.to_string()).with_job(job_id);
                warn!(kind = %failure.kind, "Stage failed: {}", failure.message);
                let job = lease.fail(failure.clone());
                self.record(&job, Some(op));
                Err(failure)
            }
        }
    }

    /// Persists the manifest and publishes the state change.
    fn record(&self, job: &Job, operation: Option<Operation>) {
        self.persist(&job.job_id);
        let event = if job.is_failed() {
            ProgressEvent::Failed {
                job: job.clone(),
                operation,
            }
        } else {
            ProgressEvent::Changed {
                job: job.clone(),
                operation,
            }
        };
        self.progress.report(event);
    }

    /// Writes the job's current state as its manifest. The state is read
    /// under the job's manifest lock, so the last write always carries the
    /// newest state regardless of the order callers arrive in.
    fn persist(&self, job_id: &str) {
        let lock = self.manifest_lock(job_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| {
            warn!(job_id, "Manifest lock was poisoned, recovering");
            poisoned.into_inner()
        });

        // Removed by a sweep since the change was made.
        let Ok(job) = self.tracker.get_state(job_id) else {
            return;
        };
        let result = serde_json::to_vec_pretty(&job)
            .map_err(|e| e.to_string())
            .and_then(|data| {
                self.store
                    .put(&job.job_id, ArtifactKind::Manifest, &data)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!(job_id, "Failed to persist job manifest: {}", e);
        }
    }

    fn manifest_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .manifest_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(job_id.to_string()).or_default())
    }

    fn forget_manifest_lock(&self, job_id: &str) {
        self.manifest_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(job_id);
    }
}
