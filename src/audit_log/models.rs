use crate::job_store::JobId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Recorded in place of a field the report did not carry.
pub const IDEM: &str = "idem";

/// One logged status observation for a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Assigned by the store on insert.
    pub seq_num: Option<i64>,
    pub job_id: JobId,
    pub status: String,
    pub minor_status: String,
    pub application_status: String,
    pub date: DateTime<Utc>,
    pub source: String,
}

/// Latest time at which a job was logged with a given major status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTimestamp {
    pub time: DateTime<Utc>,
    /// Major status as logged, possibly [`IDEM`].
    pub status: String,
}
