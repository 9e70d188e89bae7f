//! Recompute dispatch and job tracking.
//!
//! Every dispatched request becomes a job with a UUID and a status that
//! moves `requested -> scheduled -> running -> completed | failed`. Callers
//! observe it through a [`JobHandle`]. [`Dispatcher::Inline`] runs the job
//! before returning; [`Dispatcher::Queued`] hands it to a background worker
//! fed by a bounded channel.

use std::sync::Arc;

use annotally_core::error::CoreError;
use annotally_core::recompute::{RecomputeReport, RecomputeRequest, RecomputeStatus};
use annotally_core::types::DbId;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::DispatchMode;
use crate::orchestrator::Recomputer;

// ---------------------------------------------------------------------------
// Job status
// ---------------------------------------------------------------------------

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub status: RecomputeStatus,
    /// Set once the job completed.
    pub report: Option<RecomputeReport>,
    /// Set once the job failed.
    pub error: Option<String>,
}

/// Caller-side view of a dispatched recompute.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uuid,
    pub project_id: DbId,
    status: watch::Receiver<JobSnapshot>,
}

impl JobHandle {
    pub fn snapshot(&self) -> JobSnapshot {
        self.status.borrow().clone()
    }

    /// Wait until the job reaches a terminal status.
    ///
    /// If the job is dropped before finishing (the queue shut down), the
    /// last observed snapshot is returned.
    pub async fn wait(mut self) -> JobSnapshot {
        let finished = self
            .status
            .wait_for(|s| s.status.is_terminal())
            .await
            .map(|s| s.clone());
        finished.unwrap_or_else(|_| self.status.borrow().clone())
    }
}

/// Worker-side half of a job.
#[derive(Debug)]
struct Job {
    id: Uuid,
    request: RecomputeRequest,
    status: watch::Sender<JobSnapshot>,
}

impl Job {
    fn new(request: RecomputeRequest) -> (Self, JobHandle) {
        let id = Uuid::now_v7();
        let (status, receiver) = watch::channel(JobSnapshot {
            status: RecomputeStatus::Requested,
            report: None,
            error: None,
        });
        let handle = JobHandle {
            id,
            project_id: request.project_id,
            status: receiver,
        };
        (
            Self {
                id,
                request,
                status,
            },
            handle,
        )
    }

    /// Move to `to`, rejecting transitions the state machine forbids.
    fn advance(
        &self,
        to: RecomputeStatus,
        report: Option<RecomputeReport>,
        error: Option<String>,
    ) -> Result<(), CoreError> {
        let mut outcome = Ok(());
        self.status.send_if_modified(|snapshot| match snapshot.status.transition(to) {
            Ok(next) => {
                snapshot.status = next;
                snapshot.report = report;
                snapshot.error = error;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }
}

/// Run a scheduled job to completion. Failures are logged and recorded on
/// the job; they are never retried.
async fn execute(recomputer: &Recomputer, job: Job) {
    if let Err(e) = job.advance(RecomputeStatus::Running, None, None) {
        tracing::error!(
            job_id = %job.id,
            error = %e,
            "Recompute job could not start"
        );
        return;
    }

    let outcome = match recomputer.run(&job.request).await {
        Ok(report) => {
            tracing::debug!(
                job_id = %job.id,
                project_id = job.request.project_id,
                updated = report.updated,
                "Recompute job completed"
            );
            job.advance(RecomputeStatus::Completed, Some(report), None)
        }
        Err(e) => {
            tracing::error!(
                job_id = %job.id,
                project_id = job.request.project_id,
                task_count = job.request.scope.task_count(),
                error = %e,
                "Recompute job failed"
            );
            job.advance(RecomputeStatus::Failed, None, Some(e.to_string()))
        }
    };

    if let Err(e) = outcome {
        tracing::error!(
            job_id = %job.id,
            error = %e,
            "Recompute job status update rejected"
        );
    }
}

// ---------------------------------------------------------------------------
// Background queue
// ---------------------------------------------------------------------------

/// Producer side of the background recompute queue.
#[derive(Debug, Clone)]
pub struct RecomputeQueue {
    sender: mpsc::Sender<Job>,
}

impl RecomputeQueue {
    /// Spawn the worker loop and return the queue with its task handle.
    ///
    /// The worker runs one job at a time. On cancellation it finishes the
    /// job in progress and exits; jobs still queued are dropped.
    pub fn start(
        recomputer: Arc<Recomputer>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(recomputer, receiver, cancel));
        (Self { sender }, worker)
    }

    /// Schedule a request, waiting for room if the queue is full.
    pub async fn enqueue(&self, request: RecomputeRequest) -> Result<JobHandle, CoreError> {
        let (job, handle) = Job::new(request);
        job.advance(RecomputeStatus::Scheduled, None, None)?;
        self.sender
            .send(job)
            .await
            .map_err(|_| CoreError::Internal("recompute queue is closed".to_string()))?;
        tracing::debug!(
            job_id = %handle.id,
            project_id = handle.project_id,
            "Recompute job enqueued"
        );
        Ok(handle)
    }
}

async fn run_worker(
    recomputer: Arc<Recomputer>,
    mut receiver: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) {
    tracing::info!("Recompute queue started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(pending = receiver.len(), "Recompute queue stopping");
                break;
            }
            job = receiver.recv() => match job {
                Some(job) => execute(&recomputer, job).await,
                None => {
                    tracing::info!("Recompute queue closed");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes recompute requests according to the configured [`DispatchMode`].
#[derive(Clone)]
pub enum Dispatcher {
    Inline(Arc<Recomputer>),
    Queued(RecomputeQueue),
}

impl Dispatcher {
    /// Build a dispatcher for `mode`. Queue mode also returns the worker
    /// task handle.
    pub fn for_mode(
        mode: DispatchMode,
        recomputer: Arc<Recomputer>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, Option<JoinHandle<()>>) {
        match mode {
            DispatchMode::Sync => (Self::Inline(recomputer), None),
            DispatchMode::Queue => {
                let (queue, worker) = RecomputeQueue::start(recomputer, capacity, cancel);
                (Self::Queued(queue), Some(worker))
            }
        }
    }

    /// Dispatch a request. In inline mode the returned handle is already
    /// terminal.
    pub async fn dispatch(&self, request: RecomputeRequest) -> Result<JobHandle, CoreError> {
        match self {
            Self::Inline(recomputer) => {
                let (job, handle) = Job::new(request);
                job.advance(RecomputeStatus::Scheduled, None, None)?;
                execute(recomputer, job).await;
                Ok(handle)
            }
            Self::Queued(queue) => queue.enqueue(request).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
