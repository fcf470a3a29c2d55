//! Allowed job status transitions and the resolver that walks a job's
//! reports through them.

use super::report::StatusReport;
use crate::error::JobFailure;
use crate::job_store::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

/// Canonical fields produced by a status resolution. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusResolution {
    pub status: Option<JobStatus>,
    pub minor_status: Option<String>,
    pub application_status: Option<String>,
}

/// Decides which status a job ends up in after a batch of reports.
pub trait StatusResolver: Send + Sync {
    /// Walk the reports at or after `last_time` in order, starting from
    /// `current`. Implementations may rewrite reports they override so the
    /// audit log records what was applied.
    fn resolve(
        &self,
        job_id: JobId,
        last_time: DateTime<Utc>,
        reports: &mut [StatusReport],
        current: JobStatus,
        force: bool,
    ) -> Result<StatusResolution, JobFailure>;
}

/// Legal status transitions of a job.
pub struct JobsStateMachine {
    transitions: HashMap<JobStatus, Vec<JobStatus>>,
}

impl JobsStateMachine {
    pub fn new(transitions: HashMap<JobStatus, Vec<JobStatus>>) -> Self {
        Self { transitions }
    }

    pub fn standard() -> Self {
        use JobStatus::*;
        let table: [(JobStatus, &[JobStatus]); 15] = [
            (Deleted, &[]),
            (Killed, &[Deleted]),
            (Failed, &[Rescheduled, Deleted]),
            (Done, &[Deleted]),
            (Completed, &[Done, Failed]),
            (Completing, &[Done, Failed, Completed, Stalled, Killed]),
            (Stalled, &[Running, Failed, Killed]),
            (
                Running,
                &[Stalled, Done, Failed, Rescheduled, Completing, Killed, Received],
            ),
            (Rescheduled, &[Waiting, Received, Deleted, Failed, Killed]),
            (Matched, &[Running, Failed, Rescheduled, Killed]),
            (Waiting, &[Matched, Rescheduled, Deleted, Killed]),
            (Staging, &[Checking, Waiting, Failed, Killed]),
            (Checking, &[Staging, Waiting, Rescheduled, Failed, Deleted]),
            (Received, &[Checking, Waiting, Failed, Deleted]),
            (Submitting, &[Received, Checking, Deleted]),
        ];
        Self::new(
            table
                .into_iter()
                .map(|(state, next)| (state, next.to_vec()))
                .collect(),
        )
    }

    /// `candidate` if the move from `current` is legal, `current` otherwise.
    pub fn next_state(
        &self,
        current: JobStatus,
        candidate: JobStatus,
    ) -> Result<JobStatus, JobFailure> {
        let Some(allowed) = self.transitions.get(&current) else {
            return Err(JobFailure::IllegalTransition {
                from: current,
                to: candidate,
            });
        };
        if candidate == current || allowed.contains(&candidate) {
            Ok(candidate)
        } else {
            Ok(current)
        }
    }
}

impl Default for JobsStateMachine {
    fn default() -> Self {
        Self::standard()
    }
}

impl StatusResolver for JobsStateMachine {
    fn resolve(
        &self,
        job_id: JobId,
        last_time: DateTime<Utc>,
        reports: &mut [StatusReport],
        mut current: JobStatus,
        force: bool,
    ) -> Result<StatusResolution, JobFailure> {
        let mut resolution = StatusResolution::default();
        for report in reports.iter_mut().filter(|r| r.timestamp >= last_time) {
            let mut status = report.status.unwrap_or(current);
            if !force && status != current {
                let next = self.next_state(current, status)?;
                if next != status {
                    warn!(
                        job_id,
                        "Transition {} -> {} refused, keeping {}", current, status, next
                    );
                    status = next;
                    report.status = Some(next);
                    report.source.push_str("(SM)");
                }
                current = next;
            }
            resolution.status = Some(status);
            if report.minor_status.is_some() {
                resolution.minor_status = report.minor_status.clone();
            }
            if report.application_status.is_some() {
                resolution.application_status = report.application_status.clone();
            }
        }
        Ok(resolution)
    }
}
