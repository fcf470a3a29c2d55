mod common;

use chrono::{DateTime, Utc};
use common::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use wms_jobstate::audit_log::IDEM;
use wms_jobstate::background::TaskOutcome;
use wms_jobstate::job_store::{AttrValue, JobCommand, JobField, JobId, JobStatus};
use wms_jobstate::status::{
    JobsStateMachine, StatusReport, StatusResolution, StatusResolver, StatusUpdate,
};
use wms_jobstate::{JobFailure, WmsError};

#[tokio::test]
async fn test_unknown_jobs_fail_alone() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Waiting).await;

    let mut raw = changes(1, vec![(1, update(Some(JobStatus::Matched), None, "Matcher"))]);
    raw.extend(changes(999, vec![(1, update(Some(JobStatus::Matched), None, "Matcher"))]));

    let dispatched = env.service.set_job_status(raw, false).await.unwrap();
    let result = dispatched.result;

    assert_eq!(result.failed.get(&999), Some(&JobFailure::NotFound));
    assert_eq!(
        result.success[&1].get(&JobField::Status),
        Some(&AttrValue::from(JobStatus::Matched))
    );
    assert_eq!(env.job(1).await.status, Some(JobStatus::Matched));
    assert!(env.history(999).await.is_empty());
}

#[tokio::test]
async fn test_no_job_updated_is_an_error() {
    let env = create_test_env();
    let raw = changes(999, vec![(1, update(Some(JobStatus::Running), None, "JobAgent"))]);

    match env.service.set_job_status(raw, false).await {
        Err(WmsError::NoJobsUpdated(failed)) => {
            assert_eq!(failed, BTreeMap::from([(999, JobFailure::NotFound)]));
        }
        other => panic!("expected NoJobsUpdated, got {:?}", other.map(|d| d.result)),
    }
}

#[tokio::test]
async fn test_reports_without_status_are_logged_as_idem() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Running).await;
    env.seed_history(1, JobStatus::Running, t(0)).await;

    for minutes in [5, 6] {
        let raw = changes(1, vec![(minutes, update(None, Some("Uploading"), "Watchdog"))]);
        let result = env.service.set_job_status(raw, false).await.unwrap().result;
        let attributes = &result.success[&1];
        assert_eq!(
            attributes.get(&JobField::Status),
            Some(&AttrValue::from(JobStatus::Running))
        );
        assert_eq!(
            attributes.get(&JobField::MinorStatus),
            Some(&AttrValue::from("Uploading"))
        );
    }

    let history = env.history(1).await;
    assert_eq!(history.len(), 3);
    assert!(history[1..].iter().all(|r| r.status == IDEM));
    assert!(history[1..].iter().all(|r| r.minor_status == "Uploading"));
    assert_eq!(env.job(1).await.status, Some(JobStatus::Running));
}

#[tokio::test]
async fn test_older_reports_are_history_only() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Running).await;
    env.seed_history(1, JobStatus::Running, t(0)).await;

    let raw = changes(1, vec![(-1, update(Some(JobStatus::Done), None, "Pilot"))]);
    let result = env.service.set_job_status(raw, false).await.unwrap().result;
    assert!(!result.success[&1].contains_key(&JobField::Status));
    assert_eq!(env.job(1).await.status, Some(JobStatus::Running));

    let history = env.history(1).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].status, "Done");
    assert_eq!(history[1].date, t(-1));

    let raw = changes(1, vec![(1, update(Some(JobStatus::Done), None, "Pilot"))]);
    env.service.set_job_status(raw, false).await.unwrap();
    let job = env.job(1).await;
    assert_eq!(job.status, Some(JobStatus::Done));
    assert!(job.last_update_time.is_some());
}

#[tokio::test]
async fn test_out_of_order_reports_in_one_batch() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Waiting).await;
    env.seed_history(1, JobStatus::Waiting, t(0)).await;

    let raw = changes(
        1,
        vec![
            (3, update(Some(JobStatus::Done), Some("Execution Complete"), "JobWrapper")),
            (1, update(Some(JobStatus::Matched), None, "Matcher")),
            (2, update(Some(JobStatus::Running), Some("Application"), "JobAgent")),
        ],
    );
    env.service.set_job_status(raw, false).await.unwrap();

    let job = env.job(1).await;
    assert_eq!(job.status, Some(JobStatus::Done));
    assert_eq!(job.minor_status.as_deref(), Some("Execution Complete"));
    let statuses: Vec<String> = env.history(1).await.into_iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec!["Waiting", "Matched", "Running", "Done"]);
}

#[tokio::test]
async fn test_stalled_job_heals_on_any_report() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Stalled).await;
    env.seed_history(1, JobStatus::Stalled, t(0)).await;

    let raw = changes(1, vec![(1, update(None, Some("Application"), "Watchdog"))]);
    env.service.set_job_status(raw, false).await.unwrap();

    let job = env.job(1).await;
    assert_eq!(job.status, Some(JobStatus::Running));
    assert_eq!(job.minor_status.as_deref(), Some("Application"));
}

#[tokio::test]
async fn test_refused_transition_is_logged_with_marker() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Done).await;
    env.seed_history(1, JobStatus::Done, t(0)).await;

    let raw = changes(1, vec![(1, update(Some(JobStatus::Running), None, "Pilot"))]);
    env.service.set_job_status(raw, false).await.unwrap();

    assert_eq!(env.job(1).await.status, Some(JobStatus::Done));
    let history = env.history(1).await;
    assert_eq!(history[1].status, "Done");
    assert_eq!(history[1].source, "Pilot(SM)");
}

#[tokio::test]
async fn test_forced_update_skips_transition_check() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Done).await;
    env.seed_history(1, JobStatus::Done, t(0)).await;

    let raw = changes(1, vec![(1, update(Some(JobStatus::Running), None, "Operator"))]);
    env.service.set_job_status(raw, true).await.unwrap();

    assert_eq!(env.job(1).await.status, Some(JobStatus::Running));
    assert_eq!(env.history(1).await[1].source, "Operator");
}

#[tokio::test]
async fn test_killed_job_is_removed_from_its_queue() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Running).await;
    env.seed_job(2, JobStatus::Running).await;
    let killed_tq = env.enqueue(1, "Site == \"CERN\"").await;
    let other_tq = env.enqueue(2, "Site == \"RAL\"").await;

    let raw = changes(1, vec![(1, update(Some(JobStatus::Killed), None, "JobManager"))]);
    let dispatched = env.service.set_job_status(raw, false).await.unwrap();
    let outcomes = dispatched.background.await.unwrap();

    assert_eq!(
        outcomes,
        vec![(format!("delete-task-queue-{}", killed_tq), TaskOutcome::Succeeded)]
    );
    assert_eq!(env.job(1).await.status, Some(JobStatus::Killed));
    let job_store = &env.stores.job_store;
    assert_eq!(
        job_store.pending_commands(1).await.unwrap(),
        vec![JobCommand::kill(1)]
    );
    assert!(job_store.pending_commands(2).await.unwrap().is_empty());

    let tq_store = &env.stores.task_queue_store;
    assert!(tq_store.get_task_queue(killed_tq).await.unwrap().is_none());
    let other = tq_store.get_task_queue(other_tq).await.unwrap().unwrap();
    assert_eq!(other.job_ids, vec![2]);
}

#[tokio::test]
async fn test_stale_kill_does_not_cascade() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Running).await;
    env.seed_job(2, JobStatus::Running).await;
    env.seed_history(1, JobStatus::Running, t(5)).await;
    let tq_id = env.enqueue(1, "").await;

    let mut raw = changes(1, vec![(1, update(Some(JobStatus::Killed), None, "JobManager"))]);
    raw.extend(changes(2, vec![(1, update(Some(JobStatus::Killed), None, "JobManager"))]));
    let dispatched = env.service.set_job_status(raw, false).await.unwrap();
    assert!(dispatched.background.await.unwrap().is_empty());

    let job_store = &env.stores.job_store;
    assert_eq!(env.job(1).await.status, Some(JobStatus::Running));
    assert!(job_store.pending_commands(1).await.unwrap().is_empty());
    let queue = env.stores.task_queue_store.get_task_queue(tq_id).await.unwrap();
    assert_eq!(queue.unwrap().job_ids, vec![1]);

    assert_eq!(env.job(2).await.status, Some(JobStatus::Killed));
    assert_eq!(
        job_store.pending_commands(2).await.unwrap(),
        vec![JobCommand::kill(2)]
    );
}

#[tokio::test]
async fn test_non_terminal_update_does_not_touch_queues() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Waiting).await;
    let tq_id = env.enqueue(1, "").await;

    let raw = changes(1, vec![(1, update(Some(JobStatus::Matched), None, "Matcher"))]);
    let dispatched = env.service.set_job_status(raw, false).await.unwrap();
    assert!(dispatched.background.await.unwrap().is_empty());

    assert!(env.stores.job_store.pending_commands(1).await.unwrap().is_empty());
    let queue = env.stores.task_queue_store.get_task_queue(tq_id).await.unwrap();
    assert_eq!(queue.unwrap().job_ids, vec![1]);
}

#[tokio::test]
async fn test_heartbeat_and_exec_times() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Matched).await;
    env.seed_history(1, JobStatus::Matched, t(0)).await;

    let raw = changes(
        1,
        vec![
            (1, update(Some(JobStatus::Running), None, "JobAgent")),
            (2, update(None, Some("Application"), "Watchdog")),
            (3, update(Some(JobStatus::Done), None, "JobWrapper")),
        ],
    );
    env.service.set_job_status(raw, false).await.unwrap();

    let job = env.job(1).await;
    assert_eq!(job.start_exec_time, Some(t(1)));
    assert_eq!(job.end_exec_time, Some(t(3)));
    assert_eq!(job.heart_beat_time, Some(t(3)));

    // Execution times are never overwritten.
    env.seed_history(1, JobStatus::Done, t(3)).await;
    let raw = changes(1, vec![(9, update(Some(JobStatus::Done), None, "JobWrapper"))]);
    env.service.set_job_status(raw, true).await.unwrap();
    let job = env.job(1).await;
    assert_eq!(job.end_exec_time, Some(t(3)));
    assert_eq!(job.heart_beat_time, Some(t(9)));
}

#[tokio::test]
async fn test_naive_timestamp_rejects_whole_request() {
    let env = create_test_env();
    env.seed_job(1, JobStatus::Waiting).await;

    let mut raw = changes(1, vec![(1, update(Some(JobStatus::Matched), None, "Matcher"))]);
    raw.insert(
        2,
        BTreeMap::from([(
            "2024-05-01 12:00:00".to_string(),
            update(Some(JobStatus::Matched), None, "Matcher"),
        )]),
    );

    match env.service.set_job_status(raw, false).await {
        Err(WmsError::TimestampNotTimezoneAware { job_id, timestamp }) => {
            assert_eq!(job_id, 2);
            assert_eq!(timestamp, "2024-05-01 12:00:00");
        }
        other => panic!("expected timezone error, got {:?}", other.map(|d| d.result)),
    }
    assert_eq!(env.job(1).await.status, Some(JobStatus::Waiting));
    assert!(env.history(1).await.is_empty());
}

#[tokio::test]
async fn test_garbage_timestamp_is_invalid() {
    let env = create_test_env();
    let raw = BTreeMap::from([(
        1,
        BTreeMap::from([("yesterday".to_string(), StatusUpdate::default())]),
    )]);
    assert!(matches!(
        env.service.set_job_status(raw, false).await,
        Err(WmsError::InvalidTimestamp { job_id: 1, .. })
    ));
}

struct AlwaysFail;

impl StatusResolver for AlwaysFail {
    fn resolve(
        &self,
        _job_id: JobId,
        _last_time: DateTime<Utc>,
        _reports: &mut [StatusReport],
        _current: JobStatus,
        _force: bool,
    ) -> Result<StatusResolution, JobFailure> {
        Ok(StatusResolution {
            status: Some(JobStatus::Failed),
            minor_status: Some("Resolver says no".to_string()),
            application_status: None,
        })
    }
}

#[tokio::test]
async fn test_custom_resolver_decides_status() {
    let env = create_test_env_with_merge(|merge| merge.with_resolver(Arc::new(AlwaysFail)));
    env.seed_job(1, JobStatus::Running).await;

    let raw = changes(1, vec![(1, update(Some(JobStatus::Done), None, "Pilot"))]);
    env.service.set_job_status(raw, false).await.unwrap();

    let job = env.job(1).await;
    assert_eq!(job.status, Some(JobStatus::Failed));
    assert_eq!(job.minor_status.as_deref(), Some("Resolver says no"));
}

#[tokio::test]
async fn test_illegal_transition_writes_nothing_for_the_job() {
    let machine = JobsStateMachine::new(HashMap::from([(
        JobStatus::Waiting,
        vec![JobStatus::Matched],
    )]));
    let env = create_test_env_with_merge(|merge| merge.with_resolver(Arc::new(machine)));
    env.seed_job(1, JobStatus::Running).await;
    env.seed_job(2, JobStatus::Waiting).await;

    let mut raw = changes(1, vec![(1, update(Some(JobStatus::Done), None, "Pilot"))]);
    raw.extend(changes(2, vec![(1, update(Some(JobStatus::Matched), None, "Matcher"))]));
    let result = env.service.set_job_status(raw, false).await.unwrap().result;

    assert_eq!(
        result.failed.get(&1),
        Some(&JobFailure::IllegalTransition {
            from: JobStatus::Running,
            to: JobStatus::Done
        })
    );
    assert_eq!(env.job(1).await.status, Some(JobStatus::Running));
    assert!(env.history(1).await.is_empty());
    assert_eq!(env.job(2).await.status, Some(JobStatus::Matched));
}
