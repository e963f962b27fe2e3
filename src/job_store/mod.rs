//! Persistent job records.
//!
//! The store is the single source of truth for job state. Every read that
//! leads to a mutation happens inside an explicit transaction scope, so phases
//! running in different tasks never act on a stale copy of a record.

mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOB_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::{Context, Result};

/// Record operations available inside a transaction scope.
pub trait JobRecords {
    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Insert a new job. Fails if a record with the same ID exists.
    fn insert(&self, job: &Job) -> Result<()>;

    /// Delete a job. Returns the number of deleted records.
    fn delete(&self, id: &str) -> Result<usize>;

    /// Move a job to `status`, replacing its error message.
    ///
    /// Fails when the job does not exist or the transition is not allowed
    /// by the state graph.
    fn set_status(&self, id: &str, status: JobStatus, error: Option<&str>) -> Result<()>;

    /// Record the OS process running the aligner for this job.
    fn set_process_id(&self, id: &str, process_id: Option<u32>) -> Result<()>;

    /// Persist resolved query/target references.
    fn set_inputs(
        &self,
        id: &str,
        query: Option<&SequenceReference>,
        target: Option<&SequenceReference>,
    ) -> Result<()>;

    /// List jobs currently in one of `statuses`, oldest first.
    fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;
}

/// Trait for job storage.
pub trait JobStore: Send + Sync {
    /// Run `scope` inside one transaction.
    ///
    /// The transaction commits when `scope` returns `Ok` and rolls back otherwise.
    fn transact(&self, scope: &mut dyn FnMut(&dyn JobRecords) -> Result<()>) -> Result<()>;
}

/// Run `scope` in a fresh transaction of `store` and return its value.
pub fn in_transaction<T>(
    store: &dyn JobStore,
    scope: impl FnOnce(&dyn JobRecords) -> Result<T>,
) -> Result<T> {
    let mut scope = Some(scope);
    let mut output = None;
    store.transact(&mut |records: &dyn JobRecords| {
        let scope = scope.take().context("Transaction scope invoked twice")?;
        output = Some(scope(records)?);
        Ok(())
    })?;
    output.context("Transaction scope was never invoked")
}
