//! Job lifecycle: launch, intake, execution, post-processing and recovery.

mod job_orchestrator;
mod paths;
mod tasks;

pub use job_orchestrator::{
    JobError, JobOrchestrator, LaunchRequest, OrchestratorSettings, RecoveryReport, StatusReport,
    INTERRUPTED_MESSAGE, MISSING_TARGET_MESSAGE, UNEXPECTED_ERROR_MESSAGE,
};
pub use paths::JobPaths;
pub use tasks::{Phase, PhaseTask, PhaseWorker, RecordingSubmitter, TaskQueue, TaskSubmitter};
