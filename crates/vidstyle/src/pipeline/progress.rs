use crate::events::{JobEvent, JobEventBroadcaster};
use crate::job::{Job, Operation, Stage};

/// Events emitted by the controller while it drives a job.
pub enum ProgressEvent {
    Started {
        job_id: String,
        operation: Operation,
        stage: Stage,
    },
    Frames {
        job_id: String,
        operation: Operation,
        stage: Stage,
        done: usize,
        total: usize,
    },
    /// The job moved to a new non-failed state.
    Changed {
        job: Job,
        operation: Option<Operation>,
    },
    Failed {
        job: Job,
        operation: Option<Operation>,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges controller events to the job event broadcast channel.
pub struct BroadcastProgress {
    events: JobEventBroadcaster,
}

impl BroadcastProgress {
    pub fn new(events: JobEventBroadcaster) -> Self {
        Self { events }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        let event = match event {
            ProgressEvent::Started {
                job_id,
                operation,
                stage,
            } => JobEvent::started(&job_id, operation, stage),
            ProgressEvent::Frames {
                job_id,
                operation,
                stage,
                done,
                total,
            } => JobEvent::frames(&job_id, operation, stage, done, total),
            ProgressEvent::Changed { job, operation } => JobEvent::completed(&job, operation),
            ProgressEvent::Failed { job, operation } => JobEvent::failed(&job, operation),
        };
        self.events.send(event);
    }
}
