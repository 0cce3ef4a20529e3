//! Bounded analysis work queue.
//!
//! Accepts requests for background processing without losing sight of
//! them: every submission returns a handle whose outcome can be awaited,
//! and a full queue pushes back instead of accumulating unbounded work.

use crate::coordinator::AnalysisCoordinator;
use crate::error::AnalysisError;
use crate::models::{AnalysisRequest, ConsensusResult};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

struct Job {
    request: AnalysisRequest,
    reply: oneshot::Sender<Result<ConsensusResult, AnalysisError>>,
}

/// Handle to one queued analysis.
#[derive(Debug)]
pub struct JobHandle {
    study_id: String,
    reply: oneshot::Receiver<Result<ConsensusResult, AnalysisError>>,
}

impl JobHandle {
    pub fn study_id(&self) -> &str {
        &self.study_id
    }

    /// Wait for the job's outcome.
    pub async fn wait(self) -> Result<ConsensusResult, AnalysisError> {
        match self.reply.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnalysisError::Pipeline(anyhow::anyhow!(
                "analysis worker dropped job for study {}",
                self.study_id
            ))),
        }
    }
}

/// Bounded queue feeding one worker that drives the coordinator.
pub struct AnalysisQueue {
    sender: mpsc::Sender<Job>,
    worker: JoinHandle<()>,
}

impl AnalysisQueue {
    /// Spawn the worker task and return the queue front-end.
    pub fn new(coordinator: Arc<AnalysisCoordinator>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                debug!("Dequeued analysis for study {}", job.request.study_id);
                let outcome = coordinator.analyze(&job.request).await;
                // The submitter may have stopped waiting; that is fine.
                let _ = job.reply.send(outcome);
            }
            info!("Analysis queue worker stopped");
        });

        Self { sender, worker }
    }

    /// Enqueue a request. Fails fast with `QueueFull` when at capacity.
    pub fn submit(&self, request: AnalysisRequest) -> Result<JobHandle, AnalysisError> {
        let (reply, receiver) = oneshot::channel();
        let study_id = request.study_id.clone();

        self.sender
            .try_send(Job { request, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => AnalysisError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => AnalysisError::QueueClosed,
            })?;

        debug!("Enqueued analysis for study {}", study_id);
        Ok(JobHandle {
            study_id,
            reply: receiver,
        })
    }

    /// Stop accepting work and wait for the worker to drain.
    pub async fn shutdown(self) {
        drop(self.sender);
        let _ = self.worker.await;
    }
}
