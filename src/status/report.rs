use crate::audit_log::{AuditRecord, IDEM};
use crate::error::WmsError;
use crate::job_store::{JobId, JobStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_SOURCE: &str = "Unknown";

/// One observation of a job's state at a given instant.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub status: Option<JobStatus>,
    pub minor_status: Option<String>,
    pub application_status: Option<String>,
    pub source: String,
}

impl StatusReport {
    pub fn new(timestamp: DateTime<Utc>, source: &str) -> Self {
        Self {
            timestamp,
            status: None,
            minor_status: None,
            application_status: None,
            source: source.to_string(),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_minor_status(mut self, minor_status: &str) -> Self {
        self.minor_status = Some(minor_status.to_string());
        self
    }

    pub fn with_application_status(mut self, application_status: &str) -> Self {
        self.application_status = Some(application_status.to_string());
        self
    }

    pub fn to_audit_record(&self, job_id: JobId) -> AuditRecord {
        AuditRecord {
            seq_num: None,
            job_id,
            status: self
                .status
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| IDEM.to_string()),
            minor_status: self.minor_status.clone().unwrap_or_else(|| IDEM.to_string()),
            application_status: self
                .application_status
                .clone()
                .unwrap_or_else(|| IDEM.to_string()),
            date: self.timestamp,
            source: self.source.clone(),
        }
    }
}

/// A status update as submitted by a caller, keyed by its timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusUpdate {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub minor_status: Option<String>,
    #[serde(default)]
    pub application_status: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// Job ID -> timestamp text -> update, as received from callers.
pub type RawStatusChanges = BTreeMap<JobId, BTreeMap<String, StatusUpdate>>;

/// Parse a caller timestamp. An explicit UTC offset is mandatory.
pub fn parse_report_timestamp(job_id: JobId, timestamp: &str) -> Result<DateTime<Utc>, WmsError> {
    let trimmed = timestamp.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .any(|format| NaiveDateTime::parse_from_str(trimmed, format).is_ok());
    if naive {
        Err(WmsError::TimestampNotTimezoneAware {
            job_id,
            timestamp: timestamp.to_string(),
        })
    } else {
        Err(WmsError::InvalidTimestamp {
            job_id,
            timestamp: timestamp.to_string(),
        })
    }
}

/// Status reports per job, each job's reports kept in ascending time order.
///
/// Reports sharing a timestamp stay in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportBatch {
    jobs: BTreeMap<JobId, Vec<StatusReport>>,
}

impl ReportBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every timestamp of a raw submission. The first bad timestamp
    /// rejects the whole submission.
    pub fn from_raw(raw: RawStatusChanges) -> Result<Self, WmsError> {
        let mut batch = Self::new();
        for (job_id, updates) in raw {
            for (timestamp, update) in updates {
                let timestamp = parse_report_timestamp(job_id, &timestamp)?;
                batch.push(
                    job_id,
                    StatusReport {
                        timestamp,
                        status: update.status,
                        minor_status: update.minor_status,
                        application_status: update.application_status,
                        source: update.source,
                    },
                );
            }
        }
        Ok(batch)
    }

    pub fn push(&mut self, job_id: JobId, report: StatusReport) {
        let reports = self.jobs.entry(job_id).or_default();
        let position = reports.partition_point(|r| r.timestamp <= report.timestamp);
        reports.insert(position, report);
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.keys().copied().collect()
    }

    pub fn reports(&self, job_id: JobId) -> &[StatusReport] {
        self.jobs.get(&job_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_jobs(self) -> BTreeMap<JobId, Vec<StatusReport>> {
        self.jobs
    }
}
