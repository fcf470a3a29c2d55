//! Rescheduling of failed jobs: counter bound, description rewrite and
//! readmission, then a forced status update through the merge engine.

use crate::background::BackgroundTasks;
use crate::error::{FailedJobs, JobFailure, Result};
use crate::jdl::DescriptionFormat;
use crate::job_store::{
    minor_status, Admission, AttrValue, JobAttributes, JobField, JobId, JobRecord, JobStatus,
    JobStore, UNKNOWN_APPLICATION_STATUS,
};
use crate::metrics;
use crate::policy::PolicyConfig;
use crate::status::{ReportBatch, StatusMergeEngine, StatusReport, DEFAULT_SOURCE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Placeholder in descriptions replaced by the numeric job ID.
const JOB_ID_PLACEHOLDER: &str = "%j";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RescheduledJob {
    /// Description text as written back for the job.
    pub description: String,
    pub attributes: JobAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RescheduleResult {
    pub success: BTreeMap<JobId, RescheduledJob>,
    pub failed: FailedJobs,
}

/// Scheduling site for a list of requested sites.
pub fn derive_site(sites: &[String]) -> String {
    match sites {
        [] => "ANY".to_string(),
        [site] => site.clone(),
        _ => "Multiple".to_string(),
    }
}

/// A job that passed the counter checks.
struct Survivor {
    record: JobRecord,
    counter: i64,
}

/// Puts failed jobs back into the scheduling pipeline.
pub struct RescheduleEngine {
    job_store: Arc<dyn JobStore>,
    merge: Arc<StatusMergeEngine>,
    format: Arc<dyn DescriptionFormat>,
}

impl RescheduleEngine {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        merge: Arc<StatusMergeEngine>,
        format: Arc<dyn DescriptionFormat>,
    ) -> Self {
        Self {
            job_store,
            merge,
            format,
        }
    }

    /// Reschedule the given jobs.
    ///
    /// Each job fails on its own; writes already made for other jobs are
    /// kept. Jobs over the reschedule bound are forced to Failed.
    pub async fn reschedule_jobs_bulk(
        &self,
        job_ids: &[JobId],
        policy: &PolicyConfig,
        reset_counter: bool,
        background: &mut BackgroundTasks,
    ) -> Result<RescheduleResult> {
        let started = Instant::now();
        let mut failed = FailedJobs::new();
        let mut status_changes = ReportBatch::new();

        let records = self
            .job_store
            .search_jobs(
                &[
                    JobField::Status,
                    JobField::MinorStatus,
                    JobField::VerifiedFlag,
                    JobField::RescheduleCounter,
                    JobField::Owner,
                    JobField::OwnerGroup,
                ],
                job_ids,
            )
            .await?;
        let mut found: BTreeMap<JobId, JobRecord> =
            records.into_iter().map(|r| (r.job_id, r)).collect();

        let mut survivors = BTreeMap::new();
        for &job_id in job_ids {
            let Some(record) = found.remove(&job_id) else {
                if !survivors.contains_key(&job_id) && !failed.contains_key(&job_id) {
                    failed.insert(job_id, JobFailure::NotFound);
                }
                continue;
            };
            match record.verified_flag {
                None => {
                    failed.insert(job_id, JobFailure::NotFound);
                    continue;
                }
                Some(false) => {
                    failed.insert(
                        job_id,
                        JobFailure::Unverified {
                            status: record
                                .status
                                .map(|s| s.to_string())
                                .unwrap_or_default(),
                            minor_status: record.minor_status.clone().unwrap_or_default(),
                        },
                    );
                    continue;
                }
                Some(true) => {}
            }

            let counter = if reset_counter {
                0
            } else {
                record.reschedule_counter.unwrap_or(0) + 1
            };
            if counter > i64::from(policy.max_rescheduling) {
                warn!(
                    job_id,
                    "Reschedule counter {} exceeds maximum {}", counter, policy.max_rescheduling
                );
                status_changes.push(
                    job_id,
                    Self::transition(
                        Utc::now(),
                        JobStatus::Failed,
                        minor_status::MAX_RESCHEDULING,
                    ),
                );
                failed.insert(
                    job_id,
                    JobFailure::MaxReschedulesExceeded {
                        max: policy.max_rescheduling,
                    },
                );
                continue;
            }
            survivors.insert(job_id, Survivor { record, counter });
        }

        let survivor_ids: Vec<JobId> = survivors.keys().copied().collect();
        let descriptions = self
            .job_store
            .get_job_descriptions(&survivor_ids, true)
            .await?;

        let mut attribute_changes: BTreeMap<JobId, JobAttributes> = BTreeMap::new();
        let mut description_changes: BTreeMap<JobId, String> = BTreeMap::new();
        for (job_id, survivor) in &survivors {
            let job_id = *job_id;
            let Some(text) = descriptions.get(&job_id) else {
                failed.insert(job_id, JobFailure::NotFound);
                continue;
            };
            match self.prepare_job(job_id, survivor, text).await? {
                Ok((description, attributes)) => {
                    status_changes.push(
                        job_id,
                        Self::transition(Utc::now(), JobStatus::Received, minor_status::RESCHEDULED),
                    );
                    description_changes.insert(job_id, description);
                    attribute_changes.insert(job_id, attributes);
                }
                Err(failure) => {
                    warn!(job_id, "Reschedule refused: {}", failure);
                    failed.insert(job_id, failure);
                }
            }
        }

        // Jobs forced to Failed go through the merge even without survivors.
        let merged = if status_changes.is_empty() {
            Default::default()
        } else {
            self.merge
                .set_job_status_bulk(status_changes, policy, true, &attribute_changes, background)
                .await?
        };
        // Jobs the merge could not update keep their previous description.
        description_changes.retain(|job_id, _| !merged.failed.contains_key(job_id));
        self.job_store
            .set_job_descriptions_bulk(&description_changes)
            .await?;

        for (job_id, failure) in &merged.failed {
            failed.entry(*job_id).or_insert_with(|| failure.clone());
        }

        let mut success = BTreeMap::new();
        for (job_id, description) in description_changes {
            let mut attributes = attribute_changes.remove(&job_id).unwrap_or_default();
            if let Some(applied) = merged.success.get(&job_id) {
                attributes.extend(applied.iter().map(|(k, v)| (*k, v.clone())));
            }
            success.insert(
                job_id,
                RescheduledJob {
                    description,
                    attributes,
                },
            );
        }

        metrics::record_reschedules(success.len(), failed.len());
        metrics::record_bulk_operation("reschedule", started.elapsed());
        info!(
            "Reschedule: {} jobs rescheduled, {} failed",
            success.len(),
            failed.len()
        );
        Ok(RescheduleResult { success, failed })
    }

    /// Rebuild a survivor's description and scheduling attributes. The
    /// inner result carries per-job refusals, the outer one store errors.
    async fn prepare_job(
        &self,
        job_id: JobId,
        survivor: &Survivor,
        text: &str,
    ) -> Result<std::result::Result<(String, JobAttributes), JobFailure>> {
        let mut description = match self.format.parse(text) {
            Ok(description) => description,
            Err(e) => {
                return Ok(Err(JobFailure::AdmissionRejected(format!(
                    "Invalid job description: {:#}",
                    e
                ))))
            }
        };
        description.insert_attribute_int("JobID", job_id);

        let mut requirements = self.format.empty();
        let extra = JobAttributes::from([(
            JobField::RescheduleCounter,
            AttrValue::Int(survivor.counter),
        )]);
        let vo = description.get_attribute_string("VirtualOrganization");
        let admission = self
            .job_store
            .check_and_prepare_job(
                job_id,
                description.as_mut(),
                requirements.as_mut(),
                survivor.record.owner.as_deref().unwrap_or_default(),
                survivor.record.owner_group.as_deref().unwrap_or_default(),
                &extra,
                vo.as_deref(),
            )
            .await?;
        if let Admission::Rejected(reason) = admission {
            return Ok(Err(JobFailure::AdmissionRejected(reason)));
        }

        let priority = description.get_attribute_int("Priority").unwrap_or(0);
        let site = derive_site(&description.get_list_from_expression("Site"));

        description.insert_expression("JobRequirements", &requirements.as_jdl());
        let text = description
            .as_jdl()
            .replace(JOB_ID_PLACEHOLDER, &job_id.to_string());

        let attributes = JobAttributes::from([
            (JobField::Site, AttrValue::Text(site)),
            (JobField::UserPriority, AttrValue::Int(priority)),
            (JobField::RescheduleTime, AttrValue::Time(Utc::now())),
            (JobField::RescheduleCounter, AttrValue::Int(survivor.counter)),
        ]);
        Ok(Ok((text, attributes)))
    }

    fn transition(timestamp: DateTime<Utc>, status: JobStatus, minor: &str) -> StatusReport {
        StatusReport::new(timestamp, DEFAULT_SOURCE)
            .with_status(status)
            .with_minor_status(minor)
            .with_application_status(UNKNOWN_APPLICATION_STATUS)
    }
}
