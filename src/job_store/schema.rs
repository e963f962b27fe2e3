//! Database schema for jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// One row per job identifier. `query` and `target` hold JSON-encoded
/// sequence references.
const JOBS_TABLE_V0: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("email", &SqlType::Text),
        sqlite_column!("batch_type", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("process_id", &SqlType::Integer),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("query", &SqlType::Text),
        sqlite_column!("target", &SqlType::Text),
    ],
    indices: &[("idx_jobs_status", "status")],
};

pub const JOB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[JOBS_TABLE_V0],
    migration: None,
}];
