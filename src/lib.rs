//! Genome Map Jobs Library
//!
//! Lifecycle management of genome alignment jobs: file intake, aligner
//! execution, result indexing and completion notifications.

pub mod acquisition;
pub mod app;
pub mod config;
pub mod execution;
pub mod index;
pub mod job_store;
pub mod notifications;
pub mod orchestrator;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use job_store::{JobStatus, JobStore, SequenceReference, SqliteJobStore};
pub use orchestrator::{JobOrchestrator, LaunchRequest, StatusReport};
