use super::models::{DeleteIfEmptyRequest, TaskQueueInfo};
use super::TaskQueueStore;
use crate::background::BackgroundTasks;
use crate::job_store::JobId;
use crate::metrics;
use crate::policy::{GroupPolicy, PolicyConfig};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Removes jobs from their task queues and schedules the cleanup of the
/// queues left behind.
pub struct TaskQueueReconciler {
    store: Arc<dyn TaskQueueStore>,
}

impl TaskQueueReconciler {
    pub fn new(store: Arc<dyn TaskQueueStore>) -> Self {
        Self { store }
    }

    /// Drop the jobs' queue membership and queue one delete-if-empty check per
    /// touched queue into `background`.
    ///
    /// Never fails: store errors are logged and the affected step is skipped.
    /// Returns the number of cleanup checks queued.
    pub async fn remove_jobs(
        &self,
        job_ids: &[JobId],
        policy: &PolicyConfig,
        background: &mut BackgroundTasks,
    ) -> usize {
        if job_ids.is_empty() {
            return 0;
        }

        let tq_infos = match self.store.get_tq_infos_for_jobs(job_ids).await {
            Ok(infos) => infos,
            Err(e) => {
                error!("Failed to look up task queues of {} jobs: {:#}", job_ids.len(), e);
                Vec::new()
            }
        };
        match self.store.remove_jobs(job_ids).await {
            Ok(removed) => debug!("Removed {} jobs from task queues", removed),
            Err(e) => {
                error!("Failed to remove {} jobs from task queues: {:#}", job_ids.len(), e);
                return 0;
            }
        }

        for info in &tq_infos {
            let request = Self::cleanup_request(info, policy);
            let store = self.store.clone();
            background.add(format!("delete-task-queue-{}", info.tq_id), async move {
                match store.delete_task_queue_if_empty(&request).await {
                    Ok(true) => {
                        metrics::record_task_queue_cleanup("deleted");
                        info!("Task queue {} was empty and has been deleted", request.tq_id);
                        Ok(())
                    }
                    Ok(false) => {
                        metrics::record_task_queue_cleanup("kept");
                        Ok(())
                    }
                    Err(e) => {
                        metrics::record_task_queue_cleanup("error");
                        Err(e.context(format!("Failed to clean up task queue {}", request.tq_id)))
                    }
                }
            });
        }
        tq_infos.len()
    }

    fn cleanup_request(info: &TaskQueueInfo, policy: &PolicyConfig) -> DeleteIfEmptyRequest {
        let group = match policy.group_policy(&info.vo, &info.owner_group) {
            Some(group) => group.clone(),
            None => {
                warn!(
                    "No policy for group {} in {}, using defaults",
                    info.owner_group, info.vo
                );
                GroupPolicy::default()
            }
        };
        DeleteIfEmptyRequest {
            tq_id: info.tq_id,
            owner: info.owner.clone(),
            owner_group: info.owner_group.clone(),
            job_share: group.job_share,
            properties: group.properties,
            enable_shares_correction: policy.shares_correction_enabled(&info.vo),
            allow_background_tqs: group.allow_background_tqs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::TaskOutcome;
    use crate::task_queue::{TaskQueue, TaskQueueDefinition, TaskQueueId};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Fake store where each job sits in one queue and deleting `failing_tq`
    /// always errors.
    struct FakeTaskQueueStore {
        membership: Mutex<BTreeMap<JobId, TaskQueueInfo>>,
        failing_tq: Option<TaskQueueId>,
        delete_requests: Mutex<Vec<DeleteIfEmptyRequest>>,
    }

    impl FakeTaskQueueStore {
        fn new(jobs: &[(JobId, TaskQueueId)], failing_tq: Option<TaskQueueId>) -> Self {
            let membership = jobs
                .iter()
                .map(|(job_id, tq_id)| {
                    (
                        *job_id,
                        TaskQueueInfo {
                            tq_id: *tq_id,
                            owner: "alice".to_string(),
                            owner_group: "lhcb_user".to_string(),
                            vo: "lhcb".to_string(),
                        },
                    )
                })
                .collect();
            Self {
                membership: Mutex::new(membership),
                failing_tq,
                delete_requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskQueueStore for FakeTaskQueueStore {
        async fn get_tq_infos_for_jobs(&self, job_ids: &[JobId]) -> Result<Vec<TaskQueueInfo>> {
            let membership = self.membership.lock().unwrap();
            let mut infos: Vec<TaskQueueInfo> = job_ids
                .iter()
                .filter_map(|id| membership.get(id).cloned())
                .collect();
            infos.sort();
            infos.dedup();
            Ok(infos)
        }

        async fn remove_jobs(&self, job_ids: &[JobId]) -> Result<usize> {
            let mut membership = self.membership.lock().unwrap();
            Ok(job_ids.iter().filter(|id| membership.remove(id).is_some()).count())
        }

        async fn delete_task_queue_if_empty(&self, request: &DeleteIfEmptyRequest) -> Result<bool> {
            self.delete_requests.lock().unwrap().push(request.clone());
            if Some(request.tq_id) == self.failing_tq {
                bail!("database is locked");
            }
            let membership = self.membership.lock().unwrap();
            Ok(!membership.values().any(|info| info.tq_id == request.tq_id))
        }

        async fn enqueue_job(
            &self,
            _definition: &TaskQueueDefinition,
            _job_id: JobId,
            _priority: i64,
        ) -> Result<TaskQueueId> {
            unimplemented!()
        }

        async fn set_task_queue_enabled(&self, _tq_id: TaskQueueId, _enabled: bool) -> Result<()> {
            unimplemented!()
        }

        async fn get_task_queue(&self, _tq_id: TaskQueueId) -> Result<Option<TaskQueue>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_one_cleanup_per_touched_queue() {
        let store = Arc::new(FakeTaskQueueStore::new(&[(1, 10), (2, 10), (3, 20)], None));
        let reconciler = TaskQueueReconciler::new(store.clone());
        let policy = PolicyConfig::default().with_group(
            "lhcb",
            "lhcb_user",
            GroupPolicy {
                job_share: 7.0,
                properties: vec!["NormalUser".to_string()],
                allow_background_tqs: true,
            },
        );

        let mut background = BackgroundTasks::new();
        let queued = reconciler.remove_jobs(&[1, 2, 4], &policy, &mut background).await;
        assert_eq!(queued, 1);
        assert_eq!(background.names().collect::<Vec<_>>(), vec!["delete-task-queue-10"]);

        let outcomes = background.run().await;
        assert_eq!(outcomes, vec![("delete-task-queue-10".to_string(), TaskOutcome::Succeeded)]);
        let requests = store.delete_requests.lock().unwrap();
        assert_eq!(requests[0].job_share, 7.0);
        assert!(requests[0].allow_background_tqs);
        assert_eq!(requests[0].properties, vec!["NormalUser".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_cleanup_does_not_block_others() {
        let store = Arc::new(FakeTaskQueueStore::new(&[(1, 10), (2, 20), (3, 30)], Some(20)));
        let reconciler = TaskQueueReconciler::new(store.clone());

        let mut background = BackgroundTasks::new();
        let queued = reconciler
            .remove_jobs(&[1, 2, 3], &PolicyConfig::default(), &mut background)
            .await;
        assert_eq!(queued, 3);

        let outcomes = background.run().await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|(_, o)| o.is_success()).count(), 2);
        assert!(outcomes.iter().any(|(name, o)| name == "delete-task-queue-20"
            && matches!(o, TaskOutcome::Failed(msg) if msg.contains("database is locked"))));
        assert_eq!(store.delete_requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_group_uses_default_policy() {
        let store = Arc::new(FakeTaskQueueStore::new(&[(1, 10)], None));
        let reconciler = TaskQueueReconciler::new(store.clone());
        let mut background = BackgroundTasks::new();
        reconciler
            .remove_jobs(&[1], &PolicyConfig::default(), &mut background)
            .await;
        background.run().await;

        let requests = store.delete_requests.lock().unwrap();
        assert_eq!(requests[0].job_share, GroupPolicy::default().job_share);
        assert!(!requests[0].allow_background_tqs);
    }
}
