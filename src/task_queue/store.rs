use super::models::{
    DeleteIfEmptyRequest, TaskQueue, TaskQueueDefinition, TaskQueueId, TaskQueueInfo,
};
use super::schema::TASK_QUEUE_VERSIONED_SCHEMAS;
use super::shares::{calculate_priorities, merge_equivalent_queues};
use super::TaskQueueStore;
use crate::job_store::JobId;
use crate::policy::JOB_SHARING;
use crate::sqlite_persistence::{lock_conn, open_versioned, placeholders};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct SqliteTaskQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskQueueStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), TASK_QUEUE_VERSIONED_SCHEMAS, "task queue")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_definition(row: &rusqlite::Row) -> rusqlite::Result<TaskQueueDefinition> {
        Ok(TaskQueueDefinition {
            owner: row.get("owner")?,
            owner_group: row.get("owner_group")?,
            vo: row.get("vo")?,
            cpu_time: row.get("cpu_time")?,
            requirements: row.get("requirements")?,
        })
    }

    /// Rebalance the priorities of the queues belonging to an (owner, group)
    /// entity after its set of queues changed.
    fn recalculate_shares_for_entity(
        conn: &Connection,
        request: &DeleteIfEmptyRequest,
    ) -> Result<()> {
        let group_sharing = request.properties.iter().any(|p| p == JOB_SHARING);
        let (filter, filter_values, share) = if group_sharing {
            (
                "t.owner_group = ?1",
                vec![Value::Text(request.owner_group.clone())],
                request.job_share,
            )
        } else {
            let owners: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT owner) FROM task_queues WHERE owner_group = ?1",
                params![request.owner_group],
                |row| row.get(0),
            )?;
            let share = if owners > 0 {
                request.job_share / owners as f64
            } else {
                request.job_share
            };
            (
                "t.owner_group = ?1 AND t.owner = ?2",
                vec![
                    Value::Text(request.owner_group.clone()),
                    Value::Text(request.owner.clone()),
                ],
                share,
            )
        };

        let mut averages = BTreeMap::new();
        let mut definitions = BTreeMap::new();
        {
            let mut stmt = conn.prepare(&format!(
                "SELECT t.tq_id, t.owner, t.owner_group, t.vo, t.cpu_time, t.requirements,
                        AVG(j.priority) AS avg_priority
                 FROM task_queues t JOIN tq_jobs j ON j.tq_id = t.tq_id
                 WHERE {} GROUP BY t.tq_id",
                filter
            ))?;
            let mut rows = stmt.query(params_from_iter(filter_values))?;
            while let Some(row) = rows.next()? {
                let tq_id: TaskQueueId = row.get("tq_id")?;
                averages.insert(tq_id, row.get::<_, f64>("avg_priority")?);
                definitions.insert(tq_id, Self::row_to_definition(row)?);
            }
        }
        if averages.is_empty() {
            return Ok(());
        }

        let priorities = calculate_priorities(&averages, share, request.allow_background_tqs);
        let priorities = merge_equivalent_queues(&priorities, &definitions);
        for (tq_id, priority) in &priorities {
            conn.execute(
                "UPDATE task_queues SET priority = ?1 WHERE tq_id = ?2",
                params![priority, tq_id],
            )?;
        }
        if request.enable_shares_correction {
            info!(
                "Shares correction enabled for group {}, keeping computed shares",
                request.owner_group
            );
        }
        debug!(
            "Recalculated priorities of {} task queues for {}/{}",
            priorities.len(),
            request.owner,
            request.owner_group
        );
        Ok(())
    }
}

#[async_trait]
impl TaskQueueStore for SqliteTaskQueueStore {
    async fn get_tq_infos_for_jobs(&self, job_ids: &[JobId]) -> Result<Vec<TaskQueueInfo>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT t.tq_id, t.owner, t.owner_group, t.vo
             FROM task_queues t JOIN tq_jobs j ON j.tq_id = t.tq_id
             WHERE j.job_id IN ({}) ORDER BY t.tq_id",
            placeholders(job_ids.len())
        ))?;
        let infos = stmt
            .query_map(params_from_iter(job_ids.iter()), |row| {
                Ok(TaskQueueInfo {
                    tq_id: row.get(0)?,
                    owner: row.get(1)?,
                    owner_group: row.get(2)?,
                    vo: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(infos)
    }

    async fn remove_jobs(&self, job_ids: &[JobId]) -> Result<usize> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let conn = lock_conn(&self.conn)?;
        let removed = conn
            .execute(
                &format!(
                    "DELETE FROM tq_jobs WHERE job_id IN ({})",
                    placeholders(job_ids.len())
                ),
                params_from_iter(job_ids.iter()),
            )
            .context("Failed to remove jobs from task queues")?;
        Ok(removed)
    }

    async fn delete_task_queue_if_empty(&self, request: &DeleteIfEmptyRequest) -> Result<bool> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM task_queues
             WHERE tq_id = ?1 AND enabled >= 1
               AND NOT EXISTS (SELECT 1 FROM tq_jobs WHERE tq_jobs.tq_id = ?1)",
            params![request.tq_id],
        )?;
        if deleted > 0 {
            info!("Deleted empty task queue {}", request.tq_id);
            Self::recalculate_shares_for_entity(&tx, request)?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }

    async fn enqueue_job(
        &self,
        definition: &TaskQueueDefinition,
        job_id: JobId,
        priority: i64,
    ) -> Result<TaskQueueId> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        let existing: Option<TaskQueueId> = tx
            .query_row(
                "SELECT tq_id FROM task_queues
                 WHERE owner = ?1 AND owner_group = ?2 AND vo = ?3
                   AND cpu_time = ?4 AND requirements = ?5",
                params![
                    definition.owner,
                    definition.owner_group,
                    definition.vo,
                    definition.cpu_time,
                    definition.requirements
                ],
                |row| row.get(0),
            )
            .optional()?;
        let tq_id = match existing {
            Some(tq_id) => tq_id,
            None => {
                tx.execute(
                    "INSERT INTO task_queues (owner, owner_group, vo, cpu_time, requirements)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        definition.owner,
                        definition.owner_group,
                        definition.vo,
                        definition.cpu_time,
                        definition.requirements
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.execute(
            "INSERT OR REPLACE INTO tq_jobs (job_id, tq_id, priority, real_priority)
             VALUES (?1, ?2, ?3, ?3)",
            params![job_id, tq_id, priority],
        )
        .with_context(|| format!("Failed to enqueue job {}", job_id))?;
        tx.commit()?;
        Ok(tq_id)
    }

    async fn set_task_queue_enabled(&self, tq_id: TaskQueueId, enabled: bool) -> Result<()> {
        let conn = lock_conn(&self.conn)?;
        conn.execute(
            "UPDATE task_queues SET enabled = ?1 WHERE tq_id = ?2",
            params![enabled as i64, tq_id],
        )?;
        Ok(())
    }

    async fn get_task_queue(&self, tq_id: TaskQueueId) -> Result<Option<TaskQueue>> {
        let conn = lock_conn(&self.conn)?;
        let queue = conn
            .query_row(
                "SELECT * FROM task_queues WHERE tq_id = ?1",
                params![tq_id],
                |row| {
                    Ok(TaskQueue {
                        tq_id: row.get("tq_id")?,
                        definition: Self::row_to_definition(row)?,
                        priority: row.get("priority")?,
                        enabled: row.get::<_, i64>("enabled")? >= 1,
                        job_ids: Vec::new(),
                    })
                },
            )
            .optional()?;
        let Some(mut queue) = queue else {
            return Ok(None);
        };
        let mut stmt = conn.prepare("SELECT job_id FROM tq_jobs WHERE tq_id = ?1 ORDER BY job_id")?;
        queue.job_ids = stmt
            .query_map(params![tq_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(queue))
    }
}
