use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::PipelineController;
use crate::worker::request::{StageOutcome, StageRequest};

/// Fixed set of OS threads executing stage requests against one shared
/// controller. Requests for different jobs run in parallel; the tracker
/// rejects overlapping requests for the same job with `Conflict`.
pub struct WorkerPool {
    request_sender: Sender<StageRequest>,
    result_receiver: Receiver<StageOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        controller: Arc<PipelineController>,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        let (request_sender, request_receiver) = bounded::<StageRequest>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<StageOutcome>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let request_rx = request_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_controller = Arc::clone(&controller);

            let handle = thread::Builder::new()
                .name(format!("vidstyle-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        request_rx,
                        result_tx,
                        shutdown_flag,
                        worker_controller,
                    );
                })
                .map_err(|e| {
                    shutdown.store(true, Ordering::Relaxed);
                    WorkerError::SpawnFailed(e.to_string())
                })?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            request_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    /// Queues a request. Blocks while the queue is full.
    pub fn submit(&self, request: StageRequest) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.request_sender
            .send(request)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<StageOutcome> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<StageOutcome> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        drop(self.request_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    request_receiver: Receiver<StageRequest>,
    result_sender: Sender<StageOutcome>,
    shutdown: Arc<AtomicBool>,
    controller: Arc<PipelineController>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match request_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(request) => {
                debug!("Worker {} processing {:?}", worker_id, request);

                let result = request.execute(&controller);
                if let Err(ref failure) = result {
                    debug!("Worker {} request failed: {}", worker_id, failure);
                }

                if let Err(e) = result_sender.send(StageOutcome { request, result }) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} request channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
