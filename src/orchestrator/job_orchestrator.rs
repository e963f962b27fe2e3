//! Phase state machine of a single alignment job.

use super::paths::JobPaths;
use super::tasks::{Phase, PhaseTask, TaskSubmitter};
use crate::acquisition::{AcquisitionError, FileAcquirer};
use crate::config::BatchSystem;
use crate::execution::{backend_for, ExecutionOutcome, ExecutionRunner, FailureCause};
use crate::index;
use crate::job_store::{
    in_transaction, Job, JobStatus, JobStore, SequenceReference, SequenceRole,
};
use crate::notifications::NotificationDispatcher;
use anyhow::{bail, Context};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const MISSING_TARGET_MESSAGE: &str =
    "<p>A target sequence is required to launch a job.</p>";
pub const UNEXPECTED_ERROR_MESSAGE: &str =
    "<p>An unexpected error has occurred. Please contact the support to report the bug.</p>";
pub const INTERRUPTED_MESSAGE: &str = "<p>Your job #ID# was interrupted by a server restart. \
     Please submit it again.</p><p>If the problem persists, please contact the support.</p>";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Unexpected failure: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl JobError {
    pub fn user_message(&self) -> String {
        match self {
            JobError::Acquisition(e) => e.user_message(),
            JobError::Unexpected(_) => UNEXPECTED_ERROR_MESSAGE.to_string(),
        }
    }
}

/// A new comparison request.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub job_id: String,
    pub email: Option<String>,
    pub target: Option<SequenceReference>,
    pub query: Option<SequenceReference>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Known {
        status: JobStatus,
        error: Option<String>,
    },
    Unknown,
}

impl StatusReport {
    pub fn is_terminal(&self) -> bool {
        match self {
            StatusReport::Known { status, .. } => status.is_terminal(),
            StatusReport::Unknown => false,
        }
    }
}

/// Jobs touched by [`JobOrchestrator::recover_interrupted`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub data_dir: PathBuf,
    pub batch_system: BatchSystem,
    pub start_delay: Duration,
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    acquirer: FileAcquirer,
    runner: ExecutionRunner,
    /// `None` when notifications are disabled.
    dispatcher: Option<NotificationDispatcher>,
    submitter: Arc<dyn TaskSubmitter>,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        acquirer: FileAcquirer,
        runner: ExecutionRunner,
        dispatcher: Option<NotificationDispatcher>,
        submitter: Arc<dyn TaskSubmitter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            acquirer,
            runner,
            dispatcher,
            submitter,
            settings,
        }
    }

    pub fn paths(&self, job_id: &str) -> JobPaths {
        JobPaths::new(&self.settings.data_dir, job_id)
    }

    pub fn result_dir(&self, job_id: &str) -> PathBuf {
        self.paths(job_id).dir().to_path_buf()
    }

    /// Replace any record for the id with a fresh job and schedule intake.
    pub fn launch(&self, request: LaunchRequest) -> anyhow::Result<()> {
        let job_id = request.job_id.as_str();
        if job_id.is_empty() || job_id.contains(['/', '\\']) || job_id.starts_with('.') {
            bail!("Invalid job id: {:?}", job_id);
        }

        let mut job = Job::new(job_id, self.settings.batch_system.as_str());
        job.email = request.email.clone();
        job.query = request.query.clone();
        job.target = request.target.clone();
        if job.target.is_none() {
            job.status = JobStatus::Error;
            job.error = Some(MISSING_TARGET_MESSAGE.to_string());
        }

        in_transaction(self.store.as_ref(), |tx| {
            if tx.delete(job_id)? > 0 {
                info!("Job {}: replacing previous record", job_id);
            }
            tx.insert(&job)
        })
        .with_context(|| format!("Failed to create job {}", job_id))?;

        if job.target.is_none() {
            warn!("Job {}: no target given, job set to error", job_id);
            return Ok(());
        }

        if let Err(e) = self.schedule_start(job_id) {
            error!("Job {}: launch failed after the record was created: {:#}", job_id, e);
            self.abandon(job_id);
            return Err(e);
        }
        info!("Job {}: launched", job_id);
        Ok(())
    }

    fn schedule_start(&self, job_id: &str) -> anyhow::Result<()> {
        let dir = self.result_dir(job_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create job directory {:?}", dir))?;
        self.submitter
            .submit(PhaseTask::start_job(job_id, self.settings.start_delay))
    }

    /// Move a freshly created job to `error` when nothing could be scheduled for it.
    fn abandon(&self, job_id: &str) {
        let result = in_transaction(self.store.as_ref(), |tx| {
            tx.set_status(job_id, JobStatus::Error, Some(UNEXPECTED_ERROR_MESSAGE))
        });
        if let Err(e) = result {
            error!("Job {}: failed to record error state: {:#}", job_id, e);
        }
    }

    /// Run one submitted phase to completion.
    pub async fn execute(&self, task: PhaseTask) {
        match task.phase {
            Phase::StartJob => self.start_job(&task.job_id).await,
            Phase::RunJob(batch_system) => self.run_job(&task.job_id, batch_system).await,
        }
    }

    /// Acquisition phase: `created → getfiles → waiting`, then schedule execution.
    pub async fn start_job(&self, job_id: &str) {
        match self.try_start_job(job_id).await {
            Ok(()) => {}
            Err(e) => {
                match &e {
                    JobError::Acquisition(cause) => {
                        warn!("Job {}: getting input files failed: {}", job_id, cause)
                    }
                    JobError::Unexpected(cause) => {
                        error!("Job {}: unexpected failure: {:#}", job_id, cause)
                    }
                }
                self.finish_with_error(job_id, &e.user_message()).await;
            }
        }
    }

    async fn try_start_job(&self, job_id: &str) -> Result<(), JobError> {
        let Some(job) = in_transaction(self.store.as_ref(), |tx| {
            let Some(job) = tx.get(job_id)? else {
                return Ok(None);
            };
            if job.status != JobStatus::Created {
                return Ok(None);
            }
            tx.set_status(job_id, JobStatus::GetFiles, None)?;
            Ok(Some(job))
        })?
        else {
            debug!("Job {}: not awaiting intake, start skipped", job_id);
            return Ok(());
        };

        let paths = self.paths(job_id);
        let query = match &job.query {
            Some(reference) => Some(
                self.acquirer
                    .acquire(&paths, reference, SequenceRole::Query)
                    .await?
                    .into_reference(),
            ),
            None => None,
        };
        let target = match &job.target {
            Some(reference) => self
                .acquirer
                .acquire(&paths, reference, SequenceRole::Target)
                .await?
                .into_reference(),
            None => return Err(anyhow::anyhow!("Job {} has no target", job_id).into()),
        };

        in_transaction(self.store.as_ref(), |tx| {
            tx.set_inputs(job_id, query.as_ref(), Some(&target))?;
            tx.set_status(job_id, JobStatus::Waiting, None)
        })?;
        info!("Job {}: input files ready", job_id);

        self.submitter
            .submit(PhaseTask::run_job(job_id, self.settings.batch_system))?;
        Ok(())
    }

    /// Execution phase: aligner run, then indexes. Notifies once the job is terminal.
    pub async fn run_job(&self, job_id: &str, batch_system: BatchSystem) {
        match self.try_run_job(job_id, batch_system).await {
            Ok(true) => self.notify(job_id).await,
            Ok(false) => {}
            Err(e) => {
                error!("Job {}: execution phase failed: {}", job_id, e);
                self.finish_with_error(job_id, &e.user_message()).await;
            }
        }
    }

    /// Returns whether the phase has run (and the job is now terminal).
    async fn try_run_job(&self, job_id: &str, batch_system: BatchSystem) -> Result<bool, JobError> {
        let Some(job) = in_transaction(self.store.as_ref(), |tx| tx.get(job_id))? else {
            warn!("Job {}: unknown job, run skipped", job_id);
            return Ok(false);
        };
        if job.status != JobStatus::Waiting {
            debug!("Job {}: status is {}, run skipped", job_id, job.status);
            return Ok(false);
        }
        let target = job
            .target
            .as_ref()
            .with_context(|| format!("Job {} has no target", job_id))?;

        let paths = self.paths(job_id);
        let backend = backend_for(batch_system);
        let outcome = self
            .runner
            .run(
                job_id,
                backend.as_ref(),
                &paths,
                Path::new(&target.location),
                job.query.as_ref().map(|q| Path::new(q.location.as_str())),
            )
            .await?;
        if outcome != ExecutionOutcome::Success {
            return Ok(true);
        }

        in_transaction(self.store.as_ref(), |tx| {
            tx.set_status(job_id, JobStatus::Indexing, None)
        })?;

        match build_indexes(&paths, &job).await {
            Ok(()) => {
                in_transaction(self.store.as_ref(), |tx| {
                    tx.set_status(job_id, JobStatus::Success, None)
                })?;
                info!("Job {}: success", job_id);
            }
            Err(e) => {
                error!("Job {}: index generation failed: {:#}", job_id, e);
                in_transaction(self.store.as_ref(), |tx| {
                    tx.set_status(job_id, JobStatus::Error, Some(FailureCause::Generic.message()))
                })?;
            }
        }
        Ok(true)
    }

    /// Current status of a job; never mutates anything.
    pub fn status(&self, job_id: &str) -> anyhow::Result<StatusReport> {
        let job = in_transaction(self.store.as_ref(), |tx| tx.get(job_id))?;
        Ok(match job {
            Some(job) => StatusReport::Known {
                status: job.status,
                error: job.error,
            },
            None => StatusReport::Unknown,
        })
    }

    /// Reconcile jobs left in flight by a previous process.
    ///
    /// `created` jobs have no side effects yet and get their intake again.
    /// `waiting` jobs had their inputs committed and get a new run; inputs
    /// missing from the record are rebuilt from the marker files. Jobs caught
    /// in any other in-flight state may have partial side effects and fail.
    pub fn recover_interrupted(&self) -> anyhow::Result<RecoveryReport> {
        let (report, tasks) = in_transaction(self.store.as_ref(), |tx| {
            let mut report = RecoveryReport::default();
            let mut tasks = Vec::new();

            for job in tx.list_by_status(&[JobStatus::Created])? {
                tasks.push(PhaseTask::start_job(job.id.as_str(), self.settings.start_delay));
                report.resumed.push(job.id);
            }

            for job in tx.list_by_status(&[JobStatus::Waiting])? {
                if job.target.is_none() {
                    match self.inputs_from_markers(&job.id) {
                        Some((query, target)) => {
                            info!("Job {}: inputs rebuilt from marker files", job.id);
                            tx.set_inputs(&job.id, query.as_ref(), Some(&target))?;
                        }
                        None => {
                            warn!("Job {}: waiting without recorded inputs", job.id);
                            tx.set_status(&job.id, JobStatus::Error, Some(INTERRUPTED_MESSAGE))?;
                            report.failed.push(job.id);
                            continue;
                        }
                    }
                }
                tasks.push(PhaseTask::run_job(job.id.as_str(), self.batch_system_of(&job)));
                report.resumed.push(job.id);
            }

            let interrupted = tx.list_by_status(&[
                JobStatus::GetFiles,
                JobStatus::Started,
                JobStatus::Indexing,
            ])?;
            for job in interrupted {
                tx.set_status(&job.id, JobStatus::Error, Some(INTERRUPTED_MESSAGE))?;
                tx.set_process_id(&job.id, None)?;
                report.failed.push(job.id);
            }
            Ok((report, tasks))
        })?;

        for task in tasks {
            self.submitter.submit(task)?;
        }
        if !report.resumed.is_empty() || !report.failed.is_empty() {
            info!(
                "Recovered jobs: {} resumed, {} marked as interrupted",
                report.resumed.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Query and target references recorded in the `.query`/`.target` markers.
    fn inputs_from_markers(
        &self,
        job_id: &str,
    ) -> Option<(Option<SequenceReference>, SequenceReference)> {
        let paths = self.paths(job_id);
        let read_marker = |role: SequenceRole| {
            std::fs::read_to_string(paths.marker(role))
                .ok()
                .map(|contents| SequenceReference::from_marker(&contents))
                .filter(|reference| !reference.location.is_empty())
        };
        let target = read_marker(SequenceRole::Target)?;
        Some((read_marker(SequenceRole::Query), target))
    }

    fn batch_system_of(&self, job: &Job) -> BatchSystem {
        BatchSystem::from_str(&job.batch_type, true).unwrap_or(self.settings.batch_system)
    }

    /// Move a job to `error` after a fault nothing else handled, then notify.
    pub async fn fail_unexpectedly(&self, job_id: &str) {
        self.finish_with_error(job_id, UNEXPECTED_ERROR_MESSAGE).await;
    }

    async fn finish_with_error(&self, job_id: &str, message: &str) {
        let updated = in_transaction(self.store.as_ref(), |tx| {
            match tx.get(job_id)? {
                Some(job) if !job.status.is_terminal() => {
                    tx.set_status(job_id, JobStatus::Error, Some(message))?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        });
        match updated {
            Ok(true) => self.notify(job_id).await,
            Ok(false) => {}
            Err(e) => error!("Job {}: failed to record error state: {:#}", job_id, e),
        }
    }

    async fn notify(&self, job_id: &str) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.notify(job_id).await;
        }
    }
}

/// Write `target.idx` and `query.idx`. For an all-vs-all job the target
/// index is copied and the job directory is flagged.
async fn build_indexes(paths: &JobPaths, job: &Job) -> anyhow::Result<()> {
    let paths = paths.clone();
    let job = job.clone();

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let target = job
            .target
            .as_ref()
            .with_context(|| format!("Job {} has no target", job.id))?;
        let target_index = paths.index(SequenceRole::Target);
        let query_index = paths.index(SequenceRole::Query);
        index::write_index(Path::new(&target.location), &target.name, &target_index)?;

        match job.query.as_ref() {
            Some(query) if !job.is_all_vs_all() => {
                index::write_index(Path::new(&query.location), &query.name, &query_index)?;
            }
            _ => {
                std::fs::copy(&target_index, &query_index)
                    .context("Failed to copy target index as query index")?;
                std::fs::File::create(paths.all_vs_all_marker())
                    .context("Failed to create all-vs-all marker")?;
            }
        }
        Ok(())
    })
    .await
    .context("Index task panicked")?
}
