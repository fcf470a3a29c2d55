//! Append-only log of status observations per job.

mod models;
mod schema;

pub use models::{AuditRecord, StatusTimestamp, IDEM};

use crate::job_store::JobId;
use crate::sqlite_persistence::{
    format_datetime, lock_conn, open_versioned, parse_datetime, placeholders,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use schema::LOGGING_VERSIONED_SCHEMAS;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[async_trait]
pub trait AuditLogStore: Send + Sync {
    /// For each job, the latest time each distinct major status was logged,
    /// sorted by time. Jobs without records are absent from the map.
    async fn latest_major_status_timestamps(
        &self,
        job_ids: &[JobId],
    ) -> Result<BTreeMap<JobId, Vec<StatusTimestamp>>>;

    async fn append_records(&self, records: &[AuditRecord]) -> Result<()>;

    async fn delete_records(&self, job_ids: &[JobId]) -> Result<()>;

    /// Every record of a job in insertion order.
    async fn records_for_job(&self, job_id: JobId) -> Result<Vec<AuditRecord>>;
}

pub struct SqliteAuditLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditLogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), LOGGING_VERSIONED_SCHEMAS, "job logging")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
        let status_time: String = row.get("status_time")?;
        Ok(AuditRecord {
            seq_num: row.get("seq_num")?,
            job_id: row.get("job_id")?,
            status: row.get("status")?,
            minor_status: row.get("minor_status")?,
            application_status: row.get("application_status")?,
            date: parse_datetime(&status_time).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    0,
                    "status_time".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            source: row.get("source")?,
        })
    }
}

#[async_trait]
impl AuditLogStore for SqliteAuditLogStore {
    async fn latest_major_status_timestamps(
        &self,
        job_ids: &[JobId],
    ) -> Result<BTreeMap<JobId, Vec<StatusTimestamp>>> {
        let mut result: BTreeMap<JobId, Vec<StatusTimestamp>> = BTreeMap::new();
        if job_ids.is_empty() {
            return Ok(result);
        }
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT job_id, status, MAX(status_time) FROM logging_info
             WHERE job_id IN ({}) GROUP BY job_id, status",
            placeholders(job_ids.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(job_ids.iter()), |row| {
            Ok((
                row.get::<_, JobId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (job_id, status, time) = row?;
            let time = parse_datetime(&time)
                .with_context(|| format!("Invalid status time {} for job {}", time, job_id))?;
            result
                .entry(job_id)
                .or_default()
                .push(StatusTimestamp { time, status });
        }
        for timestamps in result.values_mut() {
            timestamps.sort_by_key(|ts| ts.time);
        }
        Ok(result)
    }

    async fn append_records(&self, records: &[AuditRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO logging_info
                 (job_id, status, minor_status, application_status, status_time, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.job_id,
                    record.status,
                    record.minor_status,
                    record.application_status,
                    format_datetime(&record.date),
                    record.source,
                ])
                .with_context(|| format!("Failed to log status for job {}", record.job_id))?;
            }
        }
        tx.commit()?;
        debug!("Appended {} audit records", records.len());
        Ok(())
    }

    async fn delete_records(&self, job_ids: &[JobId]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let conn = lock_conn(&self.conn)?;
        conn.execute(
            &format!(
                "DELETE FROM logging_info WHERE job_id IN ({})",
                placeholders(job_ids.len())
            ),
            params_from_iter(job_ids.iter()),
        )
        .context("Failed to delete audit records")?;
        Ok(())
    }

    async fn records_for_job(&self, job_id: JobId) -> Result<Vec<AuditRecord>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT * FROM logging_info WHERE job_id = ?1 ORDER BY seq_num",
        )?;
        let records = stmt
            .query_map(params![job_id], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
