use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::warn;
use uuid::Uuid;

use crate::error::{ErrorKind, Failure, TrackerError};
use crate::job::state::{Job, Operation, Stage};

struct JobSlot {
    job: Job,
    active: Option<Operation>,
}

type SharedSlot = Arc<Mutex<JobSlot>>;

fn lock_slot(slot: &Mutex<JobSlot>) -> MutexGuard<'_, JobSlot> {
    slot.lock().unwrap_or_else(|poisoned| {
        warn!("Job slot lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn conflict(job_id: &str, message: impl Into<String>) -> TrackerError {
    TrackerError::Conflict {
        job_id: job_id.to_string(),
        message: message.into(),
    }
}

/// In-memory registry of jobs. The map lock is held only for lookup and
/// insertion; each job has its own mutex so work on different jobs never
/// serializes.
#[derive(Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<String, SharedSlot>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, job_id: &str) -> Result<SharedSlot, TrackerError> {
        let jobs = self.jobs.read().unwrap_or_else(|poisoned| {
            warn!("Job map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))
    }

    fn insert(&self, job: Job) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(|poisoned| {
            warn!("Job map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        if jobs.contains_key(&job.job_id) {
            return false;
        }
        jobs.insert(
            job.job_id.clone(),
            Arc::new(Mutex::new(JobSlot { job, active: None })),
        );
        true
    }

    /// Registers a new job in `Created` and returns its id.
    pub fn create_job(&self, source_url: &str) -> String {
        loop {
            let job_id = Uuid::new_v4().to_string();
            if self.insert(Job::new(job_id.clone(), source_url)) {
                return job_id;
            }
        }
    }

    pub fn get_state(&self, job_id: &str) -> Result<Job, TrackerError> {
        let slot = self.slot(job_id)?;
        let guard = lock_slot(&slot);
        Ok(guard.job.clone())
    }

    /// Moves an idle job from `from` to `to`. Failures are recorded through
    /// [`JobTracker::fail`] so they always carry detail.
    pub fn transition(&self, job_id: &str, from: Stage, to: Stage) -> Result<Job, TrackerError> {
        let slot = self.slot(job_id)?;
        let mut guard = lock_slot(&slot);

        if let Some(op) = guard.active {
            return Err(conflict(job_id, format!("{} is in progress", op)));
        }
        if guard.job.stage != from {
            return Err(conflict(
                job_id,
                format!("expected stage {}, job is {}", from, guard.job.stage),
            ));
        }
        if to == Stage::Failed || !from.can_transition_to(to) {
            return Err(conflict(job_id, format!("illegal transition {} -> {}", from, to)));
        }

        guard.job.stage = to;
        guard.job.touch();
        Ok(guard.job.clone())
    }

    /// Fails an idle job.
    pub fn fail(&self, job_id: &str, failure: Failure) -> Result<Job, TrackerError> {
        let slot = self.slot(job_id)?;
        let mut guard = lock_slot(&slot);

        if let Some(op) = guard.active {
            return Err(conflict(job_id, format!("{} is in progress", op)));
        }
        if guard.job.stage == Stage::Failed {
            return Err(conflict(job_id, "job has already failed"));
        }

        guard.job.mark_failed(failure);
        Ok(guard.job.clone())
    }

    /// Claims the job for `op`. Fails with `Conflict` when another stage is
    /// in flight or the job is not in the stage `op` requires; the job is
    /// left untouched. A pending cancellation fails an otherwise valid claim
    /// with `Cancelled` and moves the job to `Failed`.
    pub fn begin(&self, job_id: &str, op: Operation) -> Result<StageLease, TrackerError> {
        let slot = self.slot(job_id)?;
        let mut guard = lock_slot(&slot);

        if let Some(active) = guard.active {
            return Err(conflict(job_id, format!("{} is in progress", active)));
        }
        if guard.job.stage != op.required_stage() {
            return Err(conflict(
                job_id,
                format!(
                    "{} requires stage {}, job is {}",
                    op,
                    op.required_stage(),
                    guard.job.stage
                ),
            ));
        }
        if guard.job.cancel_requested {
            guard.job.cancel_requested = false;
            guard
                .job
                .mark_failed(Failure::new(ErrorKind::Cancelled, "Job was cancelled"));
            return Err(TrackerError::Cancelled(job_id.to_string()));
        }

        guard.active = Some(op);
        drop(guard);

        Ok(StageLease {
            slot,
            job_id: job_id.to_string(),
            op,
            finished: false,
        })
    }

    /// Returns a failed job to the stage its failing operation started from.
    pub fn retry(&self, job_id: &str) -> Result<Job, TrackerError> {
        let slot = self.slot(job_id)?;
        let mut guard = lock_slot(&slot);

        if guard.job.stage != Stage::Failed {
            return Err(conflict(
                job_id,
                format!("only failed jobs can be retried, job is {}", guard.job.stage),
            ));
        }
        if guard
            .job
            .error
            .as_ref()
            .is_some_and(|e| e.kind == ErrorKind::Cancelled)
        {
            return Err(conflict(job_id, "cancelled jobs cannot be retried"));
        }

        let job = &mut guard.job;
        job.stage = job.failed_from.take().unwrap_or(Stage::Created);
        job.error = None;
        job.cancel_requested = false;
        if job.stage != Stage::Stylized {
            job.substituted_frames.clear();
        }
        job.touch();
        Ok(job.clone())
    }

    /// Cancels an idle job immediately; a job with a stage in flight is
    /// cancelled at its next stage boundary.
    pub fn cancel(&self, job_id: &str) -> Result<Job, TrackerError> {
        let slot = self.slot(job_id)?;
        let mut guard = lock_slot(&slot);

        if guard.job.stage.is_terminal() {
            return Err(conflict(job_id, format!("job is already {}", guard.job.stage)));
        }

        if guard.active.is_some() {
            guard.job.cancel_requested = true;
            guard.job.touch();
        } else {
            guard
                .job
                .mark_failed(Failure::new(ErrorKind::Cancelled, "Job was cancelled"));
        }
        Ok(guard.job.clone())
    }

    /// All tracked jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let slots: Vec<SharedSlot> = {
            let jobs = self.jobs.read().unwrap_or_else(|poisoned| {
                warn!("Job map lock was poisoned, recovering");
                poisoned.into_inner()
            });
            jobs.values().cloned().collect()
        };

        let mut list: Vec<Job> = slots.iter().map(|s| lock_slot(s).job.clone()).collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        list
    }

    pub fn remove(&self, job_id: &str) -> Result<Job, TrackerError> {
        let mut jobs = self.jobs.write().unwrap_or_else(|poisoned| {
            warn!("Job map lock was poisoned, recovering");
            poisoned.into_inner()
        });
        let slot = jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(job_id.to_string()))?;

        let guard = lock_slot(&slot);
        if let Some(op) = guard.active {
            return Err(conflict(job_id, format!("{} is in progress", op)));
        }
        let job = guard.job.clone();
        drop(guard);

        jobs.remove(job_id);
        Ok(job)
    }

    /// Adds a previously persisted job. Returns false when the id is already
    /// tracked.
    pub fn restore(&self, mut job: Job) -> bool {
        job.cancel_requested = false;
        self.insert(job)
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.slot(job_id)
            .map(|slot| lock_slot(&slot).active.is_some())
            .unwrap_or(false)
    }
}

/// Scoped claim on a job while one stage runs. Finish it with
/// [`StageLease::complete`] or [`StageLease::fail`]; dropping it unfinished
/// releases the claim and leaves the stage unchanged.
pub struct StageLease {
    slot: SharedSlot,
    job_id: String,
    op: Operation,
    finished: bool,
}

impl StageLease {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> Operation {
        self.op
    }

    /// Snapshot of the job as it was when the lease was taken.
    pub fn job(&self) -> Job {
        lock_slot(&self.slot).job.clone()
    }

    /// Advances the job to the operation's target stage.
    pub fn complete(self) -> Job {
        self.complete_with(|_| {})
    }

    /// Like [`StageLease::complete`], applying `update` to the job under the
    /// same lock.
    pub fn complete_with(mut self, update: impl FnOnce(&mut Job)) -> Job {
        let mut guard = lock_slot(&self.slot);
        update(&mut guard.job);
        guard.job.stage = self.op.target_stage();
        if guard.job.stage.is_terminal() {
            // Nothing left to cancel.
            guard.job.cancel_requested = false;
        }
        guard.job.error = None;
        guard.job.failed_from = None;
        guard.job.touch();
        guard.active = None;
        self.finished = true;
        guard.job.clone()
    }

    pub fn fail(mut self, failure: Failure) -> Job {
        let mut guard = lock_slot(&self.slot);
        guard.job.mark_failed(failure);
        guard.job.cancel_requested = false;
        guard.active = None;
        self.finished = true;
        guard.job.clone()
    }
}

impl Drop for StageLease {
    fn drop(&mut self) {
        if !self.finished {
            lock_slot(&self.slot).active = None;
        }
    }
}
