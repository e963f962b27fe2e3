//! SQLite-backed job store.

use super::models::{Job, JobStatus, SequenceReference};
use super::schema::JOB_VERSIONED_SCHEMAS;
use super::{JobRecords, JobStore};
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const JOB_COLUMNS: &str =
    "id, email, batch_type, status, error, process_id, created_at, query, target";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open an existing jobs database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open jobs database: {:?}", path))?;

        if is_new_db {
            JOB_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new jobs database at {:?}", path);
        } else {
            let version = read_schema_version(&conn)?;
            let schema_count = JOB_VERSIONED_SCHEMAS.len();
            if version >= schema_count {
                bail!(
                    "Jobs database version {} is too new (max supported: {})",
                    version,
                    schema_count - 1
                );
            }
            JOB_VERSIONED_SCHEMAS[version]
                .validate(&conn)
                .with_context(|| format!("Jobs database schema validation failed for version {}", version))?;
            Self::migrate_if_needed(&mut conn, version)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        JOB_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, current_version: usize) -> Result<()> {
        let target_version = JOB_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating jobs database from version {} to {}",
            current_version, target_version
        );
        let tx = conn.transaction()?;
        for schema in JOB_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(&tx).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn transact(&self, scope: &mut dyn FnMut(&dyn JobRecords) -> Result<()>) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("Jobs database lock poisoned"))?;
        let tx = conn.transaction()?;
        // Dropping `tx` without commit rolls back
        scope(&SqliteJobRecords { tx: &tx })?;
        tx.commit()?;
        Ok(())
    }
}

struct SqliteJobRecords<'a> {
    tx: &'a Transaction<'a>,
}

impl SqliteJobRecords<'_> {
    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get("status")?;
        let created_at_str: String = row.get("created_at")?;

        Ok(Job {
            id: row.get("id")?,
            email: row.get("email")?,
            batch_type: row.get("batch_type")?,
            status: JobStatus::parse(&status_str).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    Type::Text,
                    format!("Unknown job status {:?}", status_str).into(),
                )
            })?,
            error: row.get("error")?,
            process_id: row.get("process_id")?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
                })?,
            query: Self::reference_column(row, 7)?,
            target: Self::reference_column(row, 8)?,
        })
    }

    fn reference_column(
        row: &rusqlite::Row,
        index: usize,
    ) -> rusqlite::Result<Option<SequenceReference>> {
        let raw: Option<String> = row.get(index)?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
            })
        })
        .transpose()
    }

    fn encode_reference(reference: Option<&SequenceReference>) -> Result<Option<String>> {
        reference
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode sequence reference")
    }
}

impl JobRecords for SqliteJobRecords<'_> {
    fn get(&self, id: &str) -> Result<Option<Job>> {
        let job = self
            .tx
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                [id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn insert(&self, job: &Job) -> Result<()> {
        self.tx.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.email,
                job.batch_type,
                job.status.as_str(),
                job.error,
                job.process_id,
                job.created_at.to_rfc3339(),
                Self::encode_reference(job.query.as_ref())?,
                Self::encode_reference(job.target.as_ref())?,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<usize> {
        Ok(self.tx.execute("DELETE FROM jobs WHERE id = ?1", [id])?)
    }

    fn set_status(&self, id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        let current = self
            .get(id)?
            .with_context(|| format!("Job {} not found", id))?;
        if !current.status.can_transition_to(status) {
            bail!(
                "Invalid status transition for job {}: {} -> {}",
                id,
                current.status,
                status
            );
        }
        self.tx.execute(
            "UPDATE jobs SET status = ?1, error = ?2 WHERE id = ?3",
            params![status.as_str(), error, id],
        )?;
        Ok(())
    }

    fn set_process_id(&self, id: &str, process_id: Option<u32>) -> Result<()> {
        let updated = self.tx.execute(
            "UPDATE jobs SET process_id = ?1 WHERE id = ?2",
            params![process_id, id],
        )?;
        if updated == 0 {
            bail!("Job {} not found", id);
        }
        Ok(())
    }

    fn set_inputs(
        &self,
        id: &str,
        query: Option<&SequenceReference>,
        target: Option<&SequenceReference>,
    ) -> Result<()> {
        let updated = self.tx.execute(
            "UPDATE jobs SET query = ?1, target = ?2 WHERE id = ?3",
            params![
                Self::encode_reference(query)?,
                Self::encode_reference(target)?,
                id
            ],
        )?;
        if updated == 0 {
            bail!("Job {} not found", id);
        }
        Ok(())
    }

    fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at ASC",
            JOB_COLUMNS
        ))?;
        let mut jobs = Vec::new();
        for status in statuses {
            let rows = stmt
                .query_map([status.as_str()], Self::row_to_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            jobs.extend(rows);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
