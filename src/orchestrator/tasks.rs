//! Deferred phase execution.
//!
//! Phases are submitted as [`PhaseTask`]s instead of being run inline, so the
//! submitting transaction is committed before the next phase reads the record.

use super::JobOrchestrator;
use crate::config::BatchSystem;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Acquire input files.
    StartJob,
    /// Run the aligner, then build indexes.
    RunJob(BatchSystem),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTask {
    pub job_id: String,
    pub phase: Phase,
    pub delay: Duration,
}

impl PhaseTask {
    pub fn start_job(job_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            phase: Phase::StartJob,
            delay,
        }
    }

    pub fn run_job(job_id: impl Into<String>, batch_system: BatchSystem) -> Self {
        Self {
            job_id: job_id.into(),
            phase: Phase::RunJob(batch_system),
            delay: Duration::ZERO,
        }
    }
}

pub trait TaskSubmitter: Send + Sync {
    fn submit(&self, task: PhaseTask) -> Result<()>;
}

/// Channel-backed submitter consumed by a [`PhaseWorker`].
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<PhaseTask>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PhaseTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl TaskSubmitter for TaskQueue {
    fn submit(&self, task: PhaseTask) -> Result<()> {
        debug!("Submitting {:?} for job {}", task.phase, task.job_id);
        self.sender
            .send(task)
            .map_err(|e| anyhow!("Task queue closed, dropped task for job {}", e.0.job_id))
    }
}

/// Keeps submitted tasks so tests can run them one by one.
#[derive(Default)]
pub struct RecordingSubmitter {
    tasks: Mutex<Vec<PhaseTask>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every task submitted so far.
    pub fn take(&self) -> Vec<PhaseTask> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl TaskSubmitter for RecordingSubmitter {
    fn submit(&self, task: PhaseTask) -> Result<()> {
        self.tasks
            .lock()
            .map_err(|_| anyhow!("Recording submitter lock poisoned"))?
            .push(task);
        Ok(())
    }
}

/// Runs every received task on its own tokio task after its delay.
pub struct PhaseWorker {
    orchestrator: Arc<JobOrchestrator>,
    receiver: mpsc::UnboundedReceiver<PhaseTask>,
}

impl PhaseWorker {
    pub fn new(
        orchestrator: Arc<JobOrchestrator>,
        receiver: mpsc::UnboundedReceiver<PhaseTask>,
    ) -> Self {
        Self {
            orchestrator,
            receiver,
        }
    }

    /// Consume tasks until `shutdown` fires, then wait for running phases.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Phase worker started");
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                Some(task) = self.receiver.recv() => {
                    let orchestrator = self.orchestrator.clone();
                    running.spawn(run_task(orchestrator, task));
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!("Phase task failed to complete: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Phase worker received shutdown signal");
                    break;
                }
            }
        }

        // Running phases are never aborted
        if !running.is_empty() {
            info!("Waiting for {} running phases", running.len());
        }
        while running.join_next().await.is_some() {}
        info!("Phase worker stopped");
    }
}

async fn run_task(orchestrator: Arc<JobOrchestrator>, task: PhaseTask) {
    if !task.delay.is_zero() {
        tokio::time::sleep(task.delay).await;
    }
    let job_id = task.job_id.clone();
    let phase = task.phase;
    let result = AssertUnwindSafe(orchestrator.execute(task))
        .catch_unwind()
        .await;
    if result.is_err() {
        error!("Job {}: phase {:?} panicked", job_id, phase);
        orchestrator.fail_unexpectedly(&job_id).await;
    }
}
