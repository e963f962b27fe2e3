//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestJobs, WrapperMode, TARGET_FASTA};
//!
//! #[tokio::test]
//! async fn test_job_succeeds() {
//!     let jobs = TestJobs::spawn(WrapperMode::Align);
//!     let target = jobs.upload("up_seq.fa", TARGET_FASTA);
//!
//!     jobs.launch("job-1", Some(&target), None);
//!     jobs.drive().await;
//! }
//! ```

mod constants;
mod file_server;
mod fixtures;
mod harness;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use file_server::FileServer;
pub use fixtures::WrapperMode;
pub use harness::TestJobs;
