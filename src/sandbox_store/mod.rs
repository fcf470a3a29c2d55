//! Input and output sandbox associations per job.

mod schema;
mod store;

pub use store::SqliteSandboxStore;

use crate::job_store::JobId;
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxType {
    Input,
    Output,
}

impl SandboxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxType::Input => "Input",
            SandboxType::Output => "Output",
        }
    }
}

pub fn job_entity_id(job_id: JobId) -> String {
    format!("Job:{}", job_id)
}

#[async_trait]
pub trait SandboxStore: Send + Sync {
    /// Detach every sandbox from the given jobs. Sandboxes left without any
    /// entity are flagged as unassigned so that they can be purged.
    async fn unassign_sandboxes_to_jobs(&self, job_ids: &[JobId]) -> Result<()>;

    async fn assign_sandbox_to_job(
        &self,
        job_id: JobId,
        pfn: &str,
        owner: &str,
        owner_group: &str,
        sb_type: SandboxType,
    ) -> Result<()>;

    /// PFNs of the sandboxes attached to a job.
    async fn sandboxes_for_job(&self, job_id: JobId) -> Result<Vec<String>>;

    /// PFNs of sandboxes no longer attached to anything.
    async fn unassigned_sandboxes(&self) -> Result<Vec<String>>;
}
