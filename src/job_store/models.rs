//! Data models for the job store.
//!
//! Defines job statuses, the attribute vocabulary used by bulk reads and
//! writes, and the row types returned by searches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type JobId = i64;

/// Major status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobStatus {
    Submitting,
    Received,
    Checking,
    Staging,
    Waiting,
    Matched,
    Rescheduled,
    Running,
    Stalled,
    Completing,
    Completed,
    Done,
    Failed,
    Killed,
    Deleted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 15] = [
        JobStatus::Submitting,
        JobStatus::Received,
        JobStatus::Checking,
        JobStatus::Staging,
        JobStatus::Waiting,
        JobStatus::Matched,
        JobStatus::Rescheduled,
        JobStatus::Running,
        JobStatus::Stalled,
        JobStatus::Completing,
        JobStatus::Completed,
        JobStatus::Done,
        JobStatus::Failed,
        JobStatus::Killed,
        JobStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitting => "Submitting",
            JobStatus::Received => "Received",
            JobStatus::Checking => "Checking",
            JobStatus::Staging => "Staging",
            JobStatus::Waiting => "Waiting",
            JobStatus::Matched => "Matched",
            JobStatus::Rescheduled => "Rescheduled",
            JobStatus::Running => "Running",
            JobStatus::Stalled => "Stalled",
            JobStatus::Completing => "Completing",
            JobStatus::Completed => "Completed",
            JobStatus::Done => "Done",
            JobStatus::Failed => "Failed",
            JobStatus::Killed => "Killed",
            JobStatus::Deleted => "Deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    /// Done, Completed, Failed and Killed. Deleted is handled separately.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Completed | JobStatus::Failed | JobStatus::Killed
        )
    }

    /// Statuses that trigger task queue removal and a kill command.
    pub fn triggers_cascade(&self) -> bool {
        matches!(self, JobStatus::Killed | JobStatus::Deleted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minor status strings written by the engines themselves.
pub mod minor_status {
    pub const MAX_RESCHEDULING: &str = "Maximum of reschedulings reached";
    pub const RESCHEDULED: &str = "Job Rescheduled";
}

pub const UNKNOWN_APPLICATION_STATUS: &str = "Unknown";

/// Job attributes that can be read or written in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobField {
    Status,
    MinorStatus,
    ApplicationStatus,
    VerifiedFlag,
    RescheduleCounter,
    Owner,
    OwnerGroup,
    VirtualOrganization,
    StartExecTime,
    EndExecTime,
    LastUpdateTime,
    HeartBeatTime,
    RescheduleTime,
    Site,
    UserPriority,
}

impl JobField {
    pub fn column(&self) -> &'static str {
        match self {
            JobField::Status => "status",
            JobField::MinorStatus => "minor_status",
            JobField::ApplicationStatus => "application_status",
            JobField::VerifiedFlag => "verified_flag",
            JobField::RescheduleCounter => "reschedule_counter",
            JobField::Owner => "owner",
            JobField::OwnerGroup => "owner_group",
            JobField::VirtualOrganization => "vo",
            JobField::StartExecTime => "start_exec_time",
            JobField::EndExecTime => "end_exec_time",
            JobField::LastUpdateTime => "last_update_time",
            JobField::HeartBeatTime => "heart_beat_time",
            JobField::RescheduleTime => "reschedule_time",
            JobField::Site => "site",
            JobField::UserPriority => "user_priority",
        }
    }
}

/// A value written to a job attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Time(DateTime<Utc>),
    Text(String),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            AttrValue::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<JobStatus> for AttrValue {
    fn from(status: JobStatus) -> Self {
        AttrValue::Text(status.as_str().to_string())
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<DateTime<Utc>> for AttrValue {
    fn from(t: DateTime<Utc>) -> Self {
        AttrValue::Time(t)
    }
}

pub type JobAttributes = BTreeMap<JobField, AttrValue>;

/// A row returned by [`super::JobStore::search_jobs`].
///
/// Only the requested fields are populated; everything else stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: Option<JobStatus>,
    pub minor_status: Option<String>,
    pub application_status: Option<String>,
    pub verified_flag: Option<bool>,
    pub reschedule_counter: Option<i64>,
    pub owner: Option<String>,
    pub owner_group: Option<String>,
    pub vo: Option<String>,
    pub start_exec_time: Option<DateTime<Utc>>,
    pub end_exec_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub heart_beat_time: Option<DateTime<Utc>>,
    pub reschedule_time: Option<DateTime<Utc>>,
    pub site: Option<String>,
    pub user_priority: Option<i64>,
}

/// A command queued for delivery to the job's pilot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub job_id: JobId,
    pub command: String,
    pub arguments: String,
}

impl JobCommand {
    pub fn kill(job_id: JobId) -> Self {
        Self {
            job_id,
            command: "Kill".to_string(),
            arguments: String::new(),
        }
    }
}

/// A job as inserted by submission. Used to seed stores.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: JobId,
    pub owner: String,
    pub owner_group: String,
    pub vo: String,
    pub status: JobStatus,
    pub minor_status: String,
    pub verified_flag: bool,
    pub reschedule_counter: i64,
    pub jdl: String,
}

impl NewJob {
    pub fn new(job_id: JobId, owner: &str, owner_group: &str, vo: &str, jdl: &str) -> Self {
        Self {
            job_id,
            owner: owner.to_string(),
            owner_group: owner_group.to_string(),
            vo: vo.to_string(),
            status: JobStatus::Received,
            minor_status: "Job accepted".to_string(),
            verified_flag: true,
            reschedule_counter: 0,
            jdl: jdl.to_string(),
        }
    }
}

/// Outcome of the store-side admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(String),
}
