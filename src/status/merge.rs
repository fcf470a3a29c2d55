//! Bulk merge of timestamped status reports into the current job state.

use super::exec_times::{ExecTimeInference, StatusTransitionTimes};
use super::report::{ReportBatch, StatusReport};
use super::state_machine::{JobsStateMachine, StatusResolver};
use crate::audit_log::{AuditLogStore, AuditRecord};
use crate::background::BackgroundTasks;
use crate::error::{FailedJobs, JobFailure, Result};
use crate::job_store::{
    AttrValue, JobAttributes, JobCommand, JobField, JobId, JobRecord, JobStatus, JobStore,
};
use crate::metrics;
use crate::policy::PolicyConfig;
use crate::task_queue::TaskQueueReconciler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Prefix of report sources that come from the job itself.
const JOB_SOURCE_PREFIX: &str = "Job";

/// Per-job outcome of a bulk status update.
///
/// `success` holds the attributes written for every processed job, which may
/// be empty when none of its reports changed anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SetJobStatusResult {
    pub success: BTreeMap<JobId, JobAttributes>,
    pub failed: FailedJobs,
}

/// Merges timestamped reports from independent sources into the canonical
/// job state.
pub struct StatusMergeEngine {
    job_store: Arc<dyn JobStore>,
    audit_log: Arc<dyn AuditLogStore>,
    reconciler: Arc<TaskQueueReconciler>,
    resolver: Arc<dyn StatusResolver>,
    exec_times: Arc<dyn ExecTimeInference>,
}

/// What a single job contributes to the bulk writes.
struct JobMerge {
    attributes: JobAttributes,
    cascade: bool,
    records: Vec<AuditRecord>,
}

impl StatusMergeEngine {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        audit_log: Arc<dyn AuditLogStore>,
        reconciler: Arc<TaskQueueReconciler>,
    ) -> Self {
        Self {
            job_store,
            audit_log,
            reconciler,
            resolver: Arc::new(JobsStateMachine::standard()),
            exec_times: Arc::new(StatusTransitionTimes),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn StatusResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_exec_time_inference(mut self, exec_times: Arc<dyn ExecTimeInference>) -> Self {
        self.exec_times = exec_times;
        self
    }

    /// Apply a batch of reports.
    ///
    /// Jobs are processed independently: a missing job or a refused
    /// transition fails that job only. Store errors fail the whole call.
    /// Cleanup of task queues emptied by Killed or Deleted jobs is queued
    /// into `background`.
    pub async fn set_job_status_bulk(
        &self,
        changes: ReportBatch,
        policy: &PolicyConfig,
        force: bool,
        additional_attributes: &BTreeMap<JobId, JobAttributes>,
        background: &mut BackgroundTasks,
    ) -> Result<SetJobStatusResult> {
        let started = Instant::now();
        let mut result = SetJobStatusResult::default();
        if changes.is_empty() {
            return Ok(result);
        }

        let job_ids = changes.job_ids();
        let records = self
            .job_store
            .search_jobs(
                &[JobField::Status, JobField::StartExecTime, JobField::EndExecTime],
                &job_ids,
            )
            .await?;
        let mut found: BTreeMap<JobId, JobRecord> =
            records.into_iter().map(|r| (r.job_id, r)).collect();
        for job_id in &job_ids {
            if !found.contains_key(job_id) {
                warn!(job_id, "Status update for unknown job");
                result.failed.insert(*job_id, JobFailure::NotFound);
            }
        }

        let found_ids: Vec<JobId> = found.keys().copied().collect();
        let mut prior_timestamps = self
            .audit_log
            .latest_major_status_timestamps(&found_ids)
            .await?;

        let now = Utc::now();
        let mut updates = BTreeMap::new();
        let mut cascade = Vec::new();
        let mut audit_records = Vec::new();

        for (job_id, mut reports) in changes.into_jobs() {
            let Some(record) = found.remove(&job_id) else {
                continue;
            };
            let prior = prior_timestamps.remove(&job_id).unwrap_or_default();
            match self.merge_job(
                job_id,
                &record,
                &prior,
                &mut reports,
                force,
                additional_attributes.get(&job_id),
                now,
            ) {
                Ok(merge) => {
                    if merge.cascade {
                        cascade.push(job_id);
                    }
                    audit_records.extend(merge.records);
                    if !merge.attributes.is_empty() {
                        updates.insert(job_id, merge.attributes.clone());
                    }
                    result.success.insert(job_id, merge.attributes);
                }
                Err(failure) => {
                    warn!(job_id, "Status update rejected: {}", failure);
                    result.failed.insert(job_id, failure);
                }
            }
        }

        self.job_store.set_job_attributes_bulk(&updates).await?;
        if !cascade.is_empty() {
            let commands: Vec<JobCommand> = cascade.iter().map(|id| JobCommand::kill(*id)).collect();
            self.job_store.set_job_commands_bulk(&commands).await?;
        }
        self.audit_log.append_records(&audit_records).await?;
        self.reconciler
            .remove_jobs(&cascade, policy, background)
            .await;

        metrics::record_status_updates(result.success.len(), result.failed.len());
        metrics::record_bulk_operation("set_job_status", started.elapsed());
        info!(
            "Status update: {} jobs updated, {} failed, {} killed or deleted",
            result.success.len(),
            result.failed.len(),
            cascade.len()
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_job(
        &self,
        job_id: JobId,
        record: &JobRecord,
        prior: &[crate::audit_log::StatusTimestamp],
        reports: &mut [StatusReport],
        force: bool,
        additional: Option<&JobAttributes>,
        now: DateTime<Utc>,
    ) -> std::result::Result<JobMerge, JobFailure> {
        let mut attributes = JobAttributes::new();
        let Some(latest) = reports.last().map(|r| r.timestamp) else {
            return Ok(JobMerge {
                attributes,
                cascade: false,
                records: Vec::new(),
            });
        };

        let Some(mut current) = record.status else {
            return Err(JobFailure::NotFound);
        };
        // Any new report means a stalled job is alive again.
        if current == JobStatus::Stalled {
            current = JobStatus::Running;
        }
        let last_time = prior
            .iter()
            .map(|ts| ts.time)
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let (start, end) = self.exec_times.infer(
            record.start_exec_time,
            record.end_exec_time,
            prior,
            reports,
        );

        let mut new_status = None;
        if latest >= last_time {
            let resolution = self
                .resolver
                .resolve(job_id, last_time, reports, current, force)?;
            if let Some(status) = resolution.status {
                if let Some(extra) = additional {
                    attributes.extend(extra.iter().map(|(k, v)| (*k, v.clone())));
                }
                attributes.insert(JobField::Status, status.into());
                attributes.insert(JobField::LastUpdateTime, AttrValue::Time(now));
            }
            if let Some(minor) = resolution.minor_status {
                attributes.insert(JobField::MinorStatus, minor.into());
            }
            if let Some(application) = resolution.application_status {
                attributes.insert(JobField::ApplicationStatus, application.into());
            }
            new_status = resolution.status;
        } else {
            debug!(job_id, "Reports older than {}, logged as history only", last_time);
        }

        if let Some(heartbeat) = reports
            .iter()
            .rev()
            .find(|r| r.source.starts_with(JOB_SOURCE_PREFIX))
        {
            attributes.insert(JobField::HeartBeatTime, AttrValue::Time(heartbeat.timestamp));
        }

        if record.start_exec_time.is_none() {
            if let Some(start) = start {
                attributes.insert(JobField::StartExecTime, AttrValue::Time(start));
            }
        }
        if record.end_exec_time.is_none() {
            if let Some(end) = end {
                attributes.insert(JobField::EndExecTime, AttrValue::Time(end));
            }
        }

        Ok(JobMerge {
            attributes,
            cascade: new_status.is_some_and(|s| s.triggers_cascade()),
            records: reports.iter().map(|r| r.to_audit_record(job_id)).collect(),
        })
    }
}
