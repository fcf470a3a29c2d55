//! Entry point tying the stores, the engines and the policy snapshot together.

use crate::audit_log::{AuditLogStore, AuditRecord, SqliteAuditLogStore};
use crate::background::{BackgroundTasks, TaskOutcome};
use crate::config::AppConfig;
use crate::error::{Result, WmsError};
use crate::jdl::{ClassAdFormat, DescriptionFormat};
use crate::job_store::{JobAttributes, JobId, JobStore, SqliteJobStore};
use crate::policy::PolicyConfig;
use crate::removal::JobRemoval;
use crate::reschedule::{RescheduleEngine, RescheduleResult};
use crate::sandbox_store::{SandboxStore, SqliteSandboxStore};
use crate::status::{RawStatusChanges, ReportBatch, SetJobStatusResult, StatusMergeEngine};
use crate::task_queue::{SqliteTaskQueueStore, TaskQueueReconciler, TaskQueueStore};
use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// The four stores the service works on.
#[derive(Clone)]
pub struct JobStateStores {
    pub job_store: Arc<dyn JobStore>,
    pub audit_log: Arc<dyn AuditLogStore>,
    pub task_queue_store: Arc<dyn TaskQueueStore>,
    pub sandbox_store: Arc<dyn SandboxStore>,
}

impl JobStateStores {
    /// Open (or create) the SQLite databases under the configured directory.
    pub fn open_sqlite(config: &AppConfig) -> anyhow::Result<Self> {
        let job_store = SqliteJobStore::new(config.jobs_db_path(), config.policy.admission.clone())
            .context("Failed to open job database")?;
        let audit_log = SqliteAuditLogStore::new(config.job_logging_db_path())
            .context("Failed to open job logging database")?;
        let task_queue_store = SqliteTaskQueueStore::new(config.task_queue_db_path())
            .context("Failed to open task queue database")?;
        let sandbox_store = SqliteSandboxStore::new(config.sandbox_metadata_db_path())
            .context("Failed to open sandbox metadata database")?;
        Ok(Self {
            job_store: Arc::new(job_store),
            audit_log: Arc::new(audit_log),
            task_queue_store: Arc::new(task_queue_store),
            sandbox_store: Arc::new(sandbox_store),
        })
    }
}

/// Result of a call together with the handle of the background work it
/// dispatched.
pub struct Dispatched<T> {
    pub result: T,
    pub background: JoinHandle<Vec<(String, TaskOutcome)>>,
}

pub struct JobStateService {
    stores: JobStateStores,
    policy: Arc<PolicyConfig>,
    merge: Arc<StatusMergeEngine>,
    reschedule: RescheduleEngine,
    removal: JobRemoval,
    tracker: TaskTracker,
}

impl JobStateService {
    pub fn open(config: &AppConfig) -> anyhow::Result<Self> {
        let stores = JobStateStores::open_sqlite(config)?;
        info!("Opened job state databases in {:?}", config.db_dir);
        Ok(Self::new(stores, config.policy.clone()))
    }

    pub fn new(stores: JobStateStores, policy: PolicyConfig) -> Self {
        let merge = StatusMergeEngine::new(
            stores.job_store.clone(),
            stores.audit_log.clone(),
            Arc::new(TaskQueueReconciler::new(stores.task_queue_store.clone())),
        );
        Self::with_merge_engine(stores, policy, merge)
    }

    /// Build the service around a preconfigured merge engine, e.g. one with
    /// a custom status resolver.
    pub fn with_merge_engine(
        stores: JobStateStores,
        policy: PolicyConfig,
        merge: StatusMergeEngine,
    ) -> Self {
        let reconciler = Arc::new(TaskQueueReconciler::new(stores.task_queue_store.clone()));
        let merge = Arc::new(merge);
        let format: Arc<dyn DescriptionFormat> = Arc::new(ClassAdFormat);
        let reschedule = RescheduleEngine::new(stores.job_store.clone(), merge.clone(), format);
        let removal = JobRemoval::new(
            stores.job_store.clone(),
            stores.audit_log.clone(),
            stores.sandbox_store.clone(),
            reconciler,
        );
        Self {
            stores,
            policy: Arc::new(policy),
            merge,
            reschedule,
            removal,
            tracker: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn stores(&self) -> &JobStateStores {
        &self.stores
    }

    /// Apply raw status reports. Timestamps are validated before any store
    /// is touched; fails with `NoJobsUpdated` when no job was updated.
    pub async fn set_job_status(
        &self,
        changes: RawStatusChanges,
        force: bool,
    ) -> Result<Dispatched<SetJobStatusResult>> {
        let batch = ReportBatch::from_raw(changes)?;
        let mut background = BackgroundTasks::new();
        let result = self
            .merge
            .set_job_status_bulk(
                batch,
                &self.policy,
                force,
                &BTreeMap::<JobId, JobAttributes>::new(),
                &mut background,
            )
            .await?;
        let handle = self.dispatch(background);
        if result.success.is_empty() {
            return Err(WmsError::NoJobsUpdated(result.failed));
        }
        Ok(Dispatched {
            result,
            background: handle,
        })
    }

    /// Reschedule jobs; fails with `RescheduleFailed` when none succeeded.
    pub async fn reschedule_jobs(
        &self,
        job_ids: &[JobId],
        reset_counter: bool,
    ) -> Result<Dispatched<RescheduleResult>> {
        let mut background = BackgroundTasks::new();
        let result = self
            .reschedule
            .reschedule_jobs_bulk(job_ids, &self.policy, reset_counter, &mut background)
            .await?;
        let handle = self.dispatch(background);
        if result.success.is_empty() {
            return Err(WmsError::RescheduleFailed(result.failed));
        }
        Ok(Dispatched {
            result,
            background: handle,
        })
    }

    pub async fn remove_jobs(&self, job_ids: &[JobId]) -> Result<Dispatched<Vec<JobId>>> {
        let mut background = BackgroundTasks::new();
        let result = self
            .removal
            .remove_jobs(job_ids, &self.policy, &mut background)
            .await?;
        Ok(Dispatched {
            result,
            background: self.dispatch(background),
        })
    }

    pub async fn job_history(&self, job_id: JobId) -> Result<Vec<AuditRecord>> {
        Ok(self.stores.audit_log.records_for_job(job_id).await?)
    }

    /// Wait for every dispatched background unit to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!("Waiting for {} background batches", self.tracker.len());
        self.tracker.wait().await;
    }

    fn dispatch(&self, background: BackgroundTasks) -> JoinHandle<Vec<(String, TaskOutcome)>> {
        debug!("Dispatching {} background tasks", background.len());
        let group = background.into_group();
        self.tracker.spawn(group.join_all())
    }
}
