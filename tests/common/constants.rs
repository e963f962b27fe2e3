//! Shared constants for end-to-end tests
//!
//! When test data changes (sequences, addresses, wrapper behaviour),
//! update only this file.

// ============================================================================
// Sequences
// ============================================================================

/// Two-record target genome
pub const TARGET_FASTA: &str = ">chr1 first chromosome\nACGTACGTACGT\nACGT\n>chr2\nNNNNNNNN\n";

/// Single-record query genome
pub const QUERY_FASTA: &str = ">scaffold_1\nACGTACGTAC\n";

/// Expected `target.idx` for [`TARGET_FASTA`] uploaded as `up_seq.fa`
pub const TARGET_INDEX: &str = "up_seq\nchr1\t16\nchr2\t8\n";

/// Expected `query.idx` for [`QUERY_FASTA`] uploaded as `reads.fasta`
pub const QUERY_INDEX: &str = "reads\nscaffold_1\t10\n";

// ============================================================================
// Notifications
// ============================================================================

pub const OWNER_EMAIL: &str = "owner@example.org";

pub const WEB_URL: &str = "http://dgenies.test";

// ============================================================================
// Fake aligner wrapper
// ============================================================================

/// File the fake wrapper writes its arguments to, inside the job directory
pub const WRAPPER_ARGS_FILE: &str = "wrapper_args.txt";

/// A line of PAF output
pub const PAF_LINE: &str = "scaffold_1\t10\t0\t10\t+\tchr1\t16\t0\t10\t10\t10\t60";
