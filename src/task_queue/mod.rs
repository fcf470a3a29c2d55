//! Task queues group waiting jobs that share scheduling characteristics.

mod models;
mod reconciler;
mod schema;
mod shares;
mod store;

pub use models::{
    DeleteIfEmptyRequest, TaskQueue, TaskQueueDefinition, TaskQueueId, TaskQueueInfo,
    BACKGROUND_PRIORITY_THRESHOLD, TQ_MIN_SHARE,
};
pub use reconciler::TaskQueueReconciler;
pub use store::SqliteTaskQueueStore;

use crate::job_store::JobId;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TaskQueueStore: Send + Sync {
    /// Distinct queues holding any of the given jobs.
    async fn get_tq_infos_for_jobs(&self, job_ids: &[JobId]) -> Result<Vec<TaskQueueInfo>>;

    /// Drop queue membership of the given jobs. Returns how many were queued.
    async fn remove_jobs(&self, job_ids: &[JobId]) -> Result<usize>;

    /// Delete the queue if it is enabled and has no members, then rebalance
    /// the owner's remaining queues. Returns whether the queue was deleted.
    async fn delete_task_queue_if_empty(&self, request: &DeleteIfEmptyRequest) -> Result<bool>;

    /// Put a job in the queue matching `definition`, creating it if needed.
    async fn enqueue_job(
        &self,
        definition: &TaskQueueDefinition,
        job_id: JobId,
        priority: i64,
    ) -> Result<TaskQueueId>;

    async fn set_task_queue_enabled(&self, tq_id: TaskQueueId, enabled: bool) -> Result<()>;

    async fn get_task_queue(&self, tq_id: TaskQueueId) -> Result<Option<TaskQueue>>;
}
