//! Complete removal of jobs across every store.

use crate::audit_log::AuditLogStore;
use crate::background::BackgroundTasks;
use crate::error::Result;
use crate::job_store::{JobId, JobStore};
use crate::metrics;
use crate::policy::PolicyConfig;
use crate::sandbox_store::SandboxStore;
use crate::task_queue::TaskQueueReconciler;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct JobRemoval {
    job_store: Arc<dyn JobStore>,
    audit_log: Arc<dyn AuditLogStore>,
    sandbox_store: Arc<dyn SandboxStore>,
    reconciler: Arc<TaskQueueReconciler>,
}

impl JobRemoval {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        audit_log: Arc<dyn AuditLogStore>,
        sandbox_store: Arc<dyn SandboxStore>,
        reconciler: Arc<TaskQueueReconciler>,
    ) -> Self {
        Self {
            job_store,
            audit_log,
            sandbox_store,
            reconciler,
        }
    }

    /// Remove the jobs, their sandbox links, queue membership and history.
    ///
    /// Unknown IDs are removed as no-ops. Returns the processed IDs.
    pub async fn remove_jobs(
        &self,
        job_ids: &[JobId],
        policy: &PolicyConfig,
        background: &mut BackgroundTasks,
    ) -> Result<Vec<JobId>> {
        let started = Instant::now();
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.sandbox_store.unassign_sandboxes_to_jobs(job_ids).await?;
        let cleanups = self.reconciler.remove_jobs(job_ids, policy, background).await;
        self.audit_log.delete_records(job_ids).await?;
        self.job_store.delete_jobs(job_ids).await?;

        metrics::record_bulk_operation("remove_jobs", started.elapsed());
        info!(
            "Removed {} jobs, {} task queue checks scheduled",
            job_ids.len(),
            cleanups
        );
        Ok(job_ids.to_vec())
    }
}
