use crate::job_store::{JobId, JobStatus};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a single job in a bulk call could not be processed.
///
/// Failures are collected per job and returned next to the successes; they
/// never abort the rest of the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobFailure {
    #[error("Not found")]
    NotFound,

    #[error("VerifiedFlag is False: Status {status}, Minor Status: {minor_status}")]
    Unverified {
        status: String,
        minor_status: String,
    },

    #[error("Maximum number of reschedules exceeded ({max})")]
    MaxReschedulesExceeded { max: u32 },

    #[error("{0}")]
    AdmissionRejected(String),

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
}

impl JobFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            JobFailure::NotFound => "NotFound",
            JobFailure::Unverified { .. } => "Unverified",
            JobFailure::MaxReschedulesExceeded { .. } => "MaxReschedulesExceeded",
            JobFailure::AdmissionRejected(_) => "AdmissionRejected",
            JobFailure::IllegalTransition { .. } => "IllegalTransition",
        }
    }
}

impl Serialize for JobFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("JobFailure", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("detail", &self.to_string())?;
        state.end()
    }
}

pub type FailedJobs = BTreeMap<JobId, JobFailure>;

/// Errors that fail a whole bulk request.
#[derive(Error, Debug)]
pub enum WmsError {
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Timestamp {timestamp} for job {job_id} is not timezone aware")]
    TimestampNotTimezoneAware { job_id: JobId, timestamp: String },

    #[error("Invalid timestamp {timestamp} for job {job_id}")]
    InvalidTimestamp { job_id: JobId, timestamp: String },

    #[error("Failed to update any job ({} failures)", .0.len())]
    NoJobsUpdated(FailedJobs),

    #[error("Failed to reschedule any job ({} failures)", .0.len())]
    RescheduleFailed(FailedJobs),
}

pub type Result<T> = std::result::Result<T, WmsError>;
