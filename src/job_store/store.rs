use super::admission::{prepare_admission, AdmissionSettings};
use super::models::{
    Admission, AttrValue, JobAttributes, JobCommand, JobField, JobId, JobRecord, JobStatus, NewJob,
};
use super::schema::JOB_VERSIONED_SCHEMAS;
use super::JobStore;
use crate::jdl::JobDescription;
use crate::sqlite_persistence::{
    format_datetime, lock_conn, open_versioned, parse_datetime, placeholders,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    admission: AdmissionSettings,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P, admission: AdmissionSettings) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), JOB_VERSIONED_SCHEMAS, "job")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            admission,
        })
    }

    fn to_sql_value(value: &AttrValue) -> Value {
        match value {
            AttrValue::Int(i) => Value::Integer(*i),
            AttrValue::Time(t) => Value::Text(format_datetime(t)),
            AttrValue::Text(s) => Value::Text(s.clone()),
        }
    }

    fn write_attributes(conn: &Connection, job_id: JobId, attrs: &JobAttributes) -> Result<()> {
        if attrs.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = attrs
            .keys()
            .enumerate()
            .map(|(i, field)| format!("{} = ?{}", field.column(), i + 1))
            .collect();
        let sql = format!(
            "UPDATE jobs SET {} WHERE job_id = ?{}",
            assignments.join(", "),
            attrs.len() + 1
        );
        let mut values: Vec<Value> = attrs.values().map(Self::to_sql_value).collect();
        values.push(Value::Integer(job_id));
        conn.execute(&sql, params_from_iter(values))
            .with_context(|| format!("Failed to update attributes of job {}", job_id))?;
        Ok(())
    }

    fn text(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Option<String>> {
        row.get(column)
    }

    fn read_field(row: &rusqlite::Row, field: JobField, record: &mut JobRecord) -> Result<()> {
        let column = field.column();
        match field {
            JobField::Status => {
                record.status = match Self::text(row, column)? {
                    Some(s) => Some(
                        JobStatus::parse(&s)
                            .with_context(|| format!("Job {} has unknown status {}", record.job_id, s))?,
                    ),
                    None => None,
                }
            }
            JobField::MinorStatus => record.minor_status = Self::text(row, column)?,
            JobField::ApplicationStatus => record.application_status = Self::text(row, column)?,
            JobField::VerifiedFlag => {
                record.verified_flag = row.get::<_, Option<i64>>(column)?.map(|v| v != 0)
            }
            JobField::RescheduleCounter => record.reschedule_counter = row.get(column)?,
            JobField::Owner => record.owner = Self::text(row, column)?,
            JobField::OwnerGroup => record.owner_group = Self::text(row, column)?,
            JobField::VirtualOrganization => record.vo = Self::text(row, column)?,
            JobField::StartExecTime => {
                record.start_exec_time = Self::text(row, column)?.as_deref().and_then(parse_datetime)
            }
            JobField::EndExecTime => {
                record.end_exec_time = Self::text(row, column)?.as_deref().and_then(parse_datetime)
            }
            JobField::LastUpdateTime => {
                record.last_update_time = Self::text(row, column)?.as_deref().and_then(parse_datetime)
            }
            JobField::HeartBeatTime => {
                record.heart_beat_time = Self::text(row, column)?.as_deref().and_then(parse_datetime)
            }
            JobField::RescheduleTime => {
                record.reschedule_time = Self::text(row, column)?.as_deref().and_then(parse_datetime)
            }
            JobField::Site => record.site = Self::text(row, column)?,
            JobField::UserPriority => record.user_priority = row.get(column)?,
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn search_jobs(&self, fields: &[JobField], job_ids: &[JobId]) -> Result<Vec<JobRecord>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut columns = vec!["job_id".to_string()];
        columns.extend(fields.iter().map(|f| f.column().to_string()));
        let sql = format!(
            "SELECT {} FROM jobs WHERE job_id IN ({}) ORDER BY job_id",
            columns.join(", "),
            placeholders(job_ids.len())
        );

        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(job_ids.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = JobRecord {
                job_id: row.get("job_id")?,
                ..Default::default()
            };
            for field in fields {
                Self::read_field(row, *field, &mut record)?;
            }
            records.push(record);
        }
        debug!("Found {} of {} requested jobs", records.len(), job_ids.len());
        Ok(records)
    }

    async fn set_job_attributes_bulk(
        &self,
        updates: &BTreeMap<JobId, JobAttributes>,
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        for (job_id, attrs) in updates {
            Self::write_attributes(&tx, *job_id, attrs)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn set_job_commands_bulk(&self, commands: &[JobCommand]) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let now = format_datetime(&Utc::now());
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        for command in commands {
            tx.execute(
                "INSERT INTO job_commands (job_id, command, arguments, reception_time)
                 VALUES (?1, ?2, ?3, ?4)",
                params![command.job_id, command.command, command.arguments, now],
            )
            .with_context(|| format!("Failed to issue command for job {}", command.job_id))?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_job_descriptions(
        &self,
        job_ids: &[JobId],
        original: bool,
    ) -> Result<BTreeMap<JobId, String>> {
        if job_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let column = if original { "original_jdl" } else { "jdl" };
        let sql = format!(
            "SELECT job_id, {} FROM job_jdls WHERE job_id IN ({})",
            column,
            placeholders(job_ids.len())
        );
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(job_ids.iter()), |row| {
            Ok((row.get::<_, JobId>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut descriptions = BTreeMap::new();
        for row in rows {
            let (job_id, jdl) = row?;
            descriptions.insert(job_id, jdl);
        }
        Ok(descriptions)
    }

    async fn set_job_descriptions_bulk(
        &self,
        descriptions: &BTreeMap<JobId, String>,
    ) -> Result<()> {
        if descriptions.is_empty() {
            return Ok(());
        }
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        for (job_id, jdl) in descriptions {
            tx.execute(
                "UPDATE job_jdls SET jdl = ?1 WHERE job_id = ?2",
                params![jdl, job_id],
            )
            .with_context(|| format!("Failed to update description of job {}", job_id))?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn check_and_prepare_job(
        &self,
        job_id: JobId,
        job_description: &mut dyn JobDescription,
        requirements: &mut dyn JobDescription,
        owner: &str,
        owner_group: &str,
        extra: &JobAttributes,
        vo: Option<&str>,
    ) -> Result<Admission> {
        let conn = lock_conn(&self.conn)?;
        Self::write_attributes(&conn, job_id, extra)?;

        let job_vo: Option<String> = conn
            .query_row(
                "SELECT vo FROM jobs WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(job_vo) = job_vo else {
            return Ok(Admission::Rejected(format!("Job {} not found", job_id)));
        };

        Ok(prepare_admission(
            &self.admission,
            job_id,
            job_description,
            requirements,
            owner,
            owner_group,
            &job_vo,
            vo,
        ))
    }

    async fn delete_jobs(&self, job_ids: &[JobId]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let conn = lock_conn(&self.conn)?;
        let deleted = conn
            .execute(
                &format!(
                    "DELETE FROM jobs WHERE job_id IN ({})",
                    placeholders(job_ids.len())
                ),
                params_from_iter(job_ids.iter()),
            )
            .context("Failed to delete jobs")?;
        debug!("Deleted {} jobs", deleted);
        Ok(())
    }

    async fn insert_job(&self, job: &NewJob) -> Result<()> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO jobs (job_id, status, minor_status, verified_flag, reschedule_counter,
                               owner, owner_group, vo)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.job_id,
                job.status.as_str(),
                job.minor_status,
                job.verified_flag as i64,
                job.reschedule_counter,
                job.owner,
                job.owner_group,
                job.vo,
            ],
        )
        .with_context(|| format!("Failed to insert job {}", job.job_id))?;
        tx.execute(
            "INSERT INTO job_jdls (job_id, original_jdl, jdl) VALUES (?1, ?2, ?2)",
            params![job.job_id, job.jdl],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn pending_commands(&self, job_id: JobId) -> Result<Vec<JobCommand>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT job_id, command, arguments FROM job_commands WHERE job_id = ?1 ORDER BY id",
        )?;
        let commands = stmt
            .query_map(params![job_id], |row| {
                Ok(JobCommand {
                    job_id: row.get(0)?,
                    command: row.get(1)?,
                    arguments: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(commands)
    }
}
