use crate::job_store::JobId;

pub type TaskQueueId = i64;

/// Minimum priority a task queue can be given.
pub const TQ_MIN_SHARE: f64 = 0.001;

/// Queues whose average job priority is at or below this are background queues.
pub const BACKGROUND_PRIORITY_THRESHOLD: f64 = 0.1;

/// A task queue touched by a set of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskQueueInfo {
    pub tq_id: TaskQueueId,
    pub owner: String,
    pub owner_group: String,
    pub vo: String,
}

/// Everything needed to decide whether an empty queue can go and to
/// rebalance its siblings afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteIfEmptyRequest {
    pub tq_id: TaskQueueId,
    pub owner: String,
    pub owner_group: String,
    pub job_share: f64,
    pub properties: Vec<String>,
    pub enable_shares_correction: bool,
    pub allow_background_tqs: bool,
}

/// Scheduling definition of a queue. Queues with equal definitions share
/// their priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskQueueDefinition {
    pub owner: String,
    pub owner_group: String,
    pub vo: String,
    pub cpu_time: i64,
    pub requirements: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskQueue {
    pub tq_id: TaskQueueId,
    pub definition: TaskQueueDefinition,
    pub priority: f64,
    pub enabled: bool,
    pub job_ids: Vec<JobId>,
}
