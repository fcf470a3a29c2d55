//! Current state of every job: attributes, description text and pending
//! commands.

mod admission;
mod models;
mod schema;
mod store;

pub use admission::{prepare_admission, AdmissionSettings};
pub use models::{
    minor_status, Admission, AttrValue, JobAttributes, JobCommand, JobField, JobId, JobRecord,
    JobStatus, NewJob, UNKNOWN_APPLICATION_STATUS,
};
pub use store::SqliteJobStore;

use crate::jdl::JobDescription;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Keyed record store for jobs.
///
/// Every method works on a batch of jobs; unknown IDs are silently skipped
/// and callers detect them by diffing the returned keys.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read the requested fields for the given jobs, ordered by job ID.
    async fn search_jobs(&self, fields: &[JobField], job_ids: &[JobId]) -> Result<Vec<JobRecord>>;

    async fn set_job_attributes_bulk(&self, updates: &BTreeMap<JobId, JobAttributes>)
        -> Result<()>;

    async fn set_job_commands_bulk(&self, commands: &[JobCommand]) -> Result<()>;

    /// Description text per job, either as submitted (`original`) or current.
    async fn get_job_descriptions(
        &self,
        job_ids: &[JobId],
        original: bool,
    ) -> Result<BTreeMap<JobId, String>>;

    async fn set_job_descriptions_bulk(&self, descriptions: &BTreeMap<JobId, String>)
        -> Result<()>;

    /// Validate a description against the job's identity and fill in the
    /// scheduling requirements. `extra` attributes are persisted for the job
    /// whatever the outcome.
    #[allow(clippy::too_many_arguments)]
    async fn check_and_prepare_job(
        &self,
        job_id: JobId,
        job_description: &mut dyn JobDescription,
        requirements: &mut dyn JobDescription,
        owner: &str,
        owner_group: &str,
        extra: &JobAttributes,
        vo: Option<&str>,
    ) -> Result<Admission>;

    /// Delete jobs with their descriptions and commands.
    async fn delete_jobs(&self, job_ids: &[JobId]) -> Result<()>;

    async fn insert_job(&self, job: &NewJob) -> Result<()>;

    /// Commands issued for a job, oldest first.
    async fn pending_commands(&self, job_id: JobId) -> Result<Vec<JobCommand>>;
}
