//! Spawns the aligner wrapper for a job and turns its exit into a verdict.

use super::error_classifier::{self, FailureCause};
use crate::config::BatchSystem;
use crate::job_store::{in_transaction, JobStatus, JobStore};
use crate::orchestrator::JobPaths;
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Placeholder passed to the wrapper in place of a query for all-vs-all runs.
pub const NO_QUERY_SENTINEL: &str = "NONE";

/// Terminal result of one aligner run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Alignments were produced.
    Success,
    /// The aligner ran fine but found nothing.
    NoMatch,
    /// Non-zero exit.
    Error(FailureCause),
    /// Zero exit but the primary output file is missing.
    NoOutputProduced,
    /// The aligner exceeded its time budget and was killed.
    TimedOut,
}

impl ExecutionOutcome {
    /// Status and persisted message for every outcome except `Success`.
    fn terminal_state(&self) -> Option<(JobStatus, Option<&'static str>)> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::NoMatch => Some((JobStatus::NoMatch, None)),
            ExecutionOutcome::Error(cause) => Some((JobStatus::Error, Some(cause.message()))),
            ExecutionOutcome::NoOutputProduced | ExecutionOutcome::TimedOut => {
                Some((JobStatus::Error, Some(FailureCause::Generic.message())))
            }
        }
    }
}

/// Fully resolved wrapper command line for a job.
#[derive(Debug, Clone)]
pub struct AlignerInvocation {
    pub wrapper: String,
    pub aligner: String,
    pub threads: u32,
    pub target: PathBuf,
    pub query: Option<PathBuf>,
    pub paf: PathBuf,
    pub raw_paf: PathBuf,
    pub log: PathBuf,
}

impl AlignerInvocation {
    pub fn args(&self) -> Vec<String> {
        vec![
            self.aligner.clone(),
            self.threads.to_string(),
            self.target.to_string_lossy().to_string(),
            self.query
                .as_ref()
                .map(|q| q.to_string_lossy().to_string())
                .unwrap_or_else(|| NO_QUERY_SENTINEL.to_string()),
            self.paf.to_string_lossy().to_string(),
            self.raw_paf.to_string_lossy().to_string(),
        ]
    }
}

/// A way of running the aligner and judging its result.
pub trait ExecutionBackend: Send + Sync {
    fn batch_system(&self) -> BatchSystem;

    /// Start the wrapper process.
    fn spawn(&self, invocation: &AlignerInvocation) -> std::io::Result<Child>;

    /// Stop the wrapper and every process it started.
    fn terminate(&self, child: &mut Child) -> std::io::Result<()>;

    /// Derive the outcome once the process has exited.
    fn verdict(&self, exit: ExitStatus, invocation: &AlignerInvocation) -> ExecutionOutcome;
}

/// Runs the wrapper as a child of this process.
pub struct LocalBackend;

impl ExecutionBackend for LocalBackend {
    fn batch_system(&self) -> BatchSystem {
        BatchSystem::Local
    }

    fn spawn(&self, invocation: &AlignerInvocation) -> std::io::Result<Child> {
        let log = File::create(&invocation.log)?;
        let log_err = log.try_clone()?;
        let mut command = Command::new(&invocation.wrapper);
        command
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        // The wrapper leads its own group so the aligner it starts can be killed with it
        #[cfg(unix)]
        command.process_group(0);
        command.spawn()
    }

    fn terminate(&self, child: &mut Child) -> std::io::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            return kill_process_group(pid);
        }
        child.start_kill()
    }

    fn verdict(&self, exit: ExitStatus, invocation: &AlignerInvocation) -> ExecutionOutcome {
        local_verdict(exit.success(), &invocation.paf, &invocation.log)
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::other(format!("pid {} out of range", pgid)))?;
    // SAFETY: killpg only sends a signal and reads no memory
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Verdict of the local backend: exit code first, then the size of `map.paf`.
pub fn local_verdict(exited_ok: bool, paf: &Path, log: &Path) -> ExecutionOutcome {
    if !exited_ok {
        return ExecutionOutcome::Error(error_classifier::classify(log));
    }
    match std::fs::metadata(paf) {
        Ok(meta) if meta.len() > 0 => ExecutionOutcome::Success,
        Ok(_) => ExecutionOutcome::NoMatch,
        Err(_) => ExecutionOutcome::NoOutputProduced,
    }
}

pub fn backend_for(batch_system: BatchSystem) -> Arc<dyn ExecutionBackend> {
    match batch_system {
        BatchSystem::Local => Arc::new(LocalBackend),
    }
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub wrapper_path: String,
    pub aligner_path: String,
    pub threads: u32,
    pub timeout: Option<Duration>,
}

pub struct ExecutionRunner {
    store: Arc<dyn JobStore>,
    settings: RunnerSettings,
}

impl ExecutionRunner {
    pub fn new(store: Arc<dyn JobStore>, settings: RunnerSettings) -> Self {
        Self { store, settings }
    }

    pub fn invocation(
        &self,
        paths: &JobPaths,
        target: &Path,
        query: Option<&Path>,
    ) -> AlignerInvocation {
        AlignerInvocation {
            wrapper: self.settings.wrapper_path.clone(),
            aligner: self.settings.aligner_path.clone(),
            threads: self.settings.threads,
            target: target.to_path_buf(),
            query: query.map(Path::to_path_buf),
            paf: paths.paf(),
            raw_paf: paths.raw_paf(),
            log: paths.logs(),
        }
    }

    /// Run the aligner for `job_id` to completion.
    ///
    /// `error` and `no-match` verdicts are persisted here. `Success` is only
    /// returned; the caller owns the move to `indexing`.
    pub async fn run(
        &self,
        job_id: &str,
        backend: &dyn ExecutionBackend,
        paths: &JobPaths,
        target: &Path,
        query: Option<&Path>,
    ) -> Result<ExecutionOutcome> {
        let invocation = self.invocation(paths, target, query);
        debug!(
            "Job {}: spawning {} {:?} on the {} backend",
            job_id,
            invocation.wrapper,
            invocation.args(),
            backend.batch_system().as_str()
        );

        let mut child = match backend.spawn(&invocation) {
            Ok(child) => child,
            Err(e) => {
                error!("Job {}: failed to spawn aligner wrapper: {}", job_id, e);
                let outcome = ExecutionOutcome::Error(FailureCause::Generic);
                self.persist_outcome(job_id, outcome)?;
                return Ok(outcome);
            }
        };

        let pid = child.id();
        in_transaction(self.store.as_ref(), |tx| {
            tx.set_process_id(job_id, pid)?;
            tx.set_status(job_id, JobStatus::Started, None)
        })
        .with_context(|| format!("Failed to mark job {} as started", job_id))?;
        info!("Job {}: aligner started (pid {:?})", job_id, pid);

        let outcome = match self.wait(&mut child).await {
            Ok(Some(exit)) => backend.verdict(exit, &invocation),
            Ok(None) => {
                warn!(
                    "Job {}: aligner exceeded {:?}, killing it",
                    job_id, self.settings.timeout
                );
                if let Err(e) = backend.terminate(&mut child) {
                    warn!("Job {}: failed to kill aligner: {}", job_id, e);
                }
                if let Err(e) = child.wait().await {
                    warn!("Job {}: failed to reap aligner wrapper: {}", job_id, e);
                }
                ExecutionOutcome::TimedOut
            }
            Err(e) => {
                error!("Job {}: failed waiting for aligner: {}", job_id, e);
                ExecutionOutcome::Error(FailureCause::Generic)
            }
        };

        info!("Job {}: aligner finished with {:?}", job_id, outcome);
        self.persist_outcome(job_id, outcome)?;
        Ok(outcome)
    }

    /// `Ok(None)` means the timeout elapsed before the child exited.
    async fn wait(&self, child: &mut Child) -> std::io::Result<Option<ExitStatus>> {
        match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(exit) => exit.map(Some),
                Err(_) => Ok(None),
            },
            None => child.wait().await.map(Some),
        }
    }

    fn persist_outcome(&self, job_id: &str, outcome: ExecutionOutcome) -> Result<()> {
        in_transaction(self.store.as_ref(), |tx| {
            tx.set_process_id(job_id, None)?;
            if let Some((status, message)) = outcome.terminal_state() {
                tx.set_status(job_id, status, message)?;
            }
            Ok(())
        })
        .with_context(|| format!("Failed to persist aligner outcome for job {}", job_id))
    }
}
