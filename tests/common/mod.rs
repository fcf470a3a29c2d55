#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use wms_jobstate::audit_log::{AuditLogStore, AuditRecord, SqliteAuditLogStore, IDEM};
use wms_jobstate::job_store::{
    AdmissionSettings, JobField, JobId, JobRecord, JobStatus, JobStore, NewJob, SqliteJobStore,
};
use wms_jobstate::policy::{GroupPolicy, PolicyConfig};
use wms_jobstate::sandbox_store::SqliteSandboxStore;
use wms_jobstate::status::{StatusMergeEngine, StatusUpdate};
use wms_jobstate::task_queue::{
    SqliteTaskQueueStore, TaskQueueDefinition, TaskQueueId, TaskQueueReconciler,
};
use wms_jobstate::{JobStateService, JobStateStores};

pub const OWNER: &str = "alice";
pub const OWNER_GROUP: &str = "lhcb_user";
pub const VO: &str = "lhcb";

pub const DEFAULT_JDL: &str = r#"[
    Executable = "run.sh";
    JobName = "job_%j";
    VirtualOrganization = "lhcb";
    Priority = 2;
]"#;

pub struct TestEnv {
    pub service: JobStateService,
    pub stores: JobStateStores,
    _temp_dir: TempDir,
}

pub fn test_policy() -> PolicyConfig {
    PolicyConfig::default().with_group(VO, OWNER_GROUP, GroupPolicy::default())
}

pub fn create_test_stores() -> (JobStateStores, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();
    let stores = JobStateStores {
        job_store: Arc::new(
            SqliteJobStore::new(path.join("jobs.db"), AdmissionSettings::default()).unwrap(),
        ),
        audit_log: Arc::new(SqliteAuditLogStore::new(path.join("job_logging.db")).unwrap()),
        task_queue_store: Arc::new(SqliteTaskQueueStore::new(path.join("task_queue.db")).unwrap()),
        sandbox_store: Arc::new(
            SqliteSandboxStore::new(path.join("sandbox_metadata.db")).unwrap(),
        ),
    };
    (stores, temp_dir)
}

pub fn create_test_env() -> TestEnv {
    create_test_env_with_policy(test_policy())
}

pub fn create_test_env_with_policy(policy: PolicyConfig) -> TestEnv {
    let (stores, temp_dir) = create_test_stores();
    TestEnv {
        service: JobStateService::new(stores.clone(), policy),
        stores,
        _temp_dir: temp_dir,
    }
}

/// Same as `create_test_env` with a caller-provided merge engine builder.
pub fn create_test_env_with_merge(
    build: impl FnOnce(StatusMergeEngine) -> StatusMergeEngine,
) -> TestEnv {
    let (stores, temp_dir) = create_test_stores();
    let merge = StatusMergeEngine::new(
        stores.job_store.clone(),
        stores.audit_log.clone(),
        Arc::new(TaskQueueReconciler::new(stores.task_queue_store.clone())),
    );
    TestEnv {
        service: JobStateService::with_merge_engine(stores.clone(), test_policy(), build(merge)),
        stores,
        _temp_dir: temp_dir,
    }
}

/// Fixed reference time plus an offset in minutes.
pub fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// `t(minutes)` as a caller would submit it.
pub fn ts(minutes: i64) -> String {
    t(minutes).to_rfc3339()
}

impl TestEnv {
    pub async fn seed_job(&self, job_id: JobId, status: JobStatus) {
        self.seed_job_with(job_id, status, DEFAULT_JDL, |_| {}).await;
    }

    pub async fn seed_job_with(
        &self,
        job_id: JobId,
        status: JobStatus,
        jdl: &str,
        customize: impl FnOnce(&mut NewJob),
    ) {
        let mut job = NewJob::new(job_id, OWNER, OWNER_GROUP, VO, jdl);
        job.status = status;
        customize(&mut job);
        self.stores.job_store.insert_job(&job).await.unwrap();
    }

    /// Log a past major status for a job.
    pub async fn seed_history(&self, job_id: JobId, status: JobStatus, at: DateTime<Utc>) {
        self.stores
            .audit_log
            .append_records(&[AuditRecord {
                seq_num: None,
                job_id,
                status: status.as_str().to_string(),
                minor_status: IDEM.to_string(),
                application_status: IDEM.to_string(),
                date: at,
                source: "JobManager".to_string(),
            }])
            .await
            .unwrap();
    }

    pub async fn enqueue(&self, job_id: JobId, requirements: &str) -> TaskQueueId {
        let definition = TaskQueueDefinition {
            owner: OWNER.to_string(),
            owner_group: OWNER_GROUP.to_string(),
            vo: VO.to_string(),
            cpu_time: 86400,
            requirements: requirements.to_string(),
        };
        self.stores
            .task_queue_store
            .enqueue_job(&definition, job_id, 1)
            .await
            .unwrap()
    }

    pub async fn job(&self, job_id: JobId) -> JobRecord {
        let mut records = self
            .stores
            .job_store
            .search_jobs(
                &[
                    JobField::Status,
                    JobField::MinorStatus,
                    JobField::ApplicationStatus,
                    JobField::RescheduleCounter,
                    JobField::StartExecTime,
                    JobField::EndExecTime,
                    JobField::HeartBeatTime,
                    JobField::LastUpdateTime,
                    JobField::RescheduleTime,
                    JobField::Site,
                    JobField::UserPriority,
                ],
                &[job_id],
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 1, "job {} should exist", job_id);
        records.remove(0)
    }

    pub async fn history(&self, job_id: JobId) -> Vec<AuditRecord> {
        self.service.job_history(job_id).await.unwrap()
    }
}

pub fn update(status: Option<JobStatus>, minor: Option<&str>, source: &str) -> StatusUpdate {
    StatusUpdate {
        status,
        minor_status: minor.map(str::to_string),
        application_status: None,
        source: source.to_string(),
    }
}

/// One job, its reports keyed by minutes offset.
pub fn changes(
    job_id: JobId,
    reports: Vec<(i64, StatusUpdate)>,
) -> BTreeMap<JobId, BTreeMap<String, StatusUpdate>> {
    BTreeMap::from([(
        job_id,
        reports
            .into_iter()
            .map(|(minutes, update)| (ts(minutes), update))
            .collect(),
    )])
}
