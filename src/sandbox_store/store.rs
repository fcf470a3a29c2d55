use super::schema::SANDBOX_VERSIONED_SCHEMAS;
use super::{job_entity_id, SandboxStore, SandboxType};
use crate::job_store::JobId;
use crate::sqlite_persistence::{format_datetime, lock_conn, open_versioned, placeholders};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct SqliteSandboxStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSandboxStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), SANDBOX_VERSIONED_SCHEMAS, "sandbox metadata")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl SandboxStore for SqliteSandboxStore {
    async fn unassign_sandboxes_to_jobs(&self, job_ids: &[JobId]) -> Result<()> {
        if job_ids.is_empty() {
            return Ok(());
        }
        let entities: Vec<String> = job_ids.iter().map(|id| job_entity_id(*id)).collect();
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;

        let sb_ids: Vec<i64> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT DISTINCT sb_id FROM sb_entity_mapping WHERE entity_id IN ({})",
                placeholders(entities.len())
            ))?;
            let ids = stmt
                .query_map(params_from_iter(entities.iter()), |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        tx.execute(
            &format!(
                "DELETE FROM sb_entity_mapping WHERE entity_id IN ({})",
                placeholders(entities.len())
            ),
            params_from_iter(entities.iter()),
        )
        .context("Failed to unassign sandboxes")?;
        for sb_id in &sb_ids {
            tx.execute(
                "UPDATE sb_sandboxes SET assigned = 0 WHERE sb_id = ?1
                 AND NOT EXISTS (SELECT 1 FROM sb_entity_mapping WHERE sb_id = ?1)",
                params![sb_id],
            )?;
        }
        tx.commit()?;
        debug!("Unassigned {} sandboxes from {} jobs", sb_ids.len(), job_ids.len());
        Ok(())
    }

    async fn assign_sandbox_to_job(
        &self,
        job_id: JobId,
        pfn: &str,
        owner: &str,
        owner_group: &str,
        sb_type: SandboxType,
    ) -> Result<()> {
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT sb_id FROM sb_sandboxes WHERE se_pfn = ?1",
                params![pfn],
                |row| row.get(0),
            )
            .optional()?;
        let sb_id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO sb_sandboxes (owner, owner_group, se_pfn, registration_time)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![owner, owner_group, pfn, format_datetime(&Utc::now())],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.execute(
            "INSERT INTO sb_entity_mapping (sb_id, entity_id, sb_type) VALUES (?1, ?2, ?3)",
            params![sb_id, job_entity_id(job_id), sb_type.as_str()],
        )?;
        tx.execute(
            "UPDATE sb_sandboxes SET assigned = 1 WHERE sb_id = ?1",
            params![sb_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn sandboxes_for_job(&self, job_id: JobId) -> Result<Vec<String>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT s.se_pfn FROM sb_sandboxes s
             JOIN sb_entity_mapping m ON m.sb_id = s.sb_id
             WHERE m.entity_id = ?1 ORDER BY s.se_pfn",
        )?;
        let pfns = stmt
            .query_map(params![job_entity_id(job_id)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pfns)
    }

    async fn unassigned_sandboxes(&self) -> Result<Vec<String>> {
        let conn = lock_conn(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT se_pfn FROM sb_sandboxes WHERE assigned = 0 ORDER BY se_pfn")?;
        let pfns = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pfns)
    }
}
