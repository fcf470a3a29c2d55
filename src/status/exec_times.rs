use super::report::StatusReport;
use crate::audit_log::StatusTimestamp;
use crate::job_store::JobStatus;
use chrono::{DateTime, Utc};

/// Infers when a job started and stopped executing from its status history.
pub trait ExecTimeInference: Send + Sync {
    /// Returns the (start, end) execution times. Existing values are returned
    /// untouched.
    fn infer(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        prior: &[StatusTimestamp],
        reports: &[StatusReport],
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>);
}

/// Start is the first report that leaves the job Running, end the first
/// report that leaves it in a final state.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusTransitionTimes;

impl ExecTimeInference for StatusTransitionTimes {
    fn infer(
        &self,
        mut start: Option<DateTime<Utc>>,
        mut end: Option<DateTime<Utc>>,
        prior: &[StatusTimestamp],
        reports: &[StatusReport],
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let Some(first) = reports.first() else {
            return (start, end);
        };
        let mut status = prior
            .iter()
            .rev()
            .find(|ts| ts.time <= first.timestamp)
            .and_then(|ts| JobStatus::parse(&ts.status));

        for report in reports {
            if report.status.is_some() {
                status = report.status;
            }
            match status {
                Some(JobStatus::Running) if start.is_none() => start = Some(report.timestamp),
                Some(s) if s.is_final() && end.is_none() => end = Some(report.timestamp),
                _ => {}
            }
        }
        (start, end)
    }
}
