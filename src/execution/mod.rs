//! Aligner execution and failure classification.

pub mod error_classifier;
mod runner;

pub use error_classifier::FailureCause;
pub use runner::{
    backend_for, local_verdict, AlignerInvocation, ExecutionBackend, ExecutionOutcome,
    ExecutionRunner, LocalBackend, RunnerSettings, NO_QUERY_SENTINEL,
};
