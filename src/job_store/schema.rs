//! SQLite schema definitions for the job database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Jobs, descriptions and commands
// =============================================================================

const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("minor_status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "application_status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'Unknown'")
        ),
        sqlite_column!(
            "verified_flag",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "reschedule_counter",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("owner", &SqlType::Text, non_null = true),
        sqlite_column!("owner_group", &SqlType::Text, non_null = true),
        sqlite_column!("vo", &SqlType::Text, non_null = true),
        sqlite_column!("start_exec_time", &SqlType::Text),
        sqlite_column!("end_exec_time", &SqlType::Text),
        sqlite_column!("last_update_time", &SqlType::Text),
        sqlite_column!("heart_beat_time", &SqlType::Text),
        sqlite_column!("site", &SqlType::Text),
        sqlite_column!("user_priority", &SqlType::Integer),
    ],
    indices: &[("idx_jobs_status", "status"), ("idx_jobs_owner", "owner")],
};

const JOB_FK: ForeignKey = ForeignKey {
    foreign_table: "jobs",
    foreign_column: "job_id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Original and current description text, one row per job
const JOB_JDLS_TABLE_V1: Table = Table {
    name: "job_jdls",
    columns: &[
        sqlite_column!(
            "job_id",
            &SqlType::Integer,
            is_primary_key = true,
            foreign_key = Some(&JOB_FK)
        ),
        sqlite_column!("original_jdl", &SqlType::Text, non_null = true),
        sqlite_column!("jdl", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Commands waiting to be picked up by the job's pilot
const JOB_COMMANDS_TABLE_V1: Table = Table {
    name: "job_commands",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!(
            "job_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&JOB_FK)
        ),
        sqlite_column!("command", &SqlType::Text, non_null = true),
        sqlite_column!("arguments", &SqlType::Text, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'Received'")
        ),
        sqlite_column!("reception_time", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_job_commands_job_id", "job_id")],
};

// =============================================================================
// Version 2 - Reschedule bookkeeping
// =============================================================================

const JOBS_TABLE_V2: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("minor_status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "application_status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'Unknown'")
        ),
        sqlite_column!(
            "verified_flag",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "reschedule_counter",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("owner", &SqlType::Text, non_null = true),
        sqlite_column!("owner_group", &SqlType::Text, non_null = true),
        sqlite_column!("vo", &SqlType::Text, non_null = true),
        sqlite_column!("start_exec_time", &SqlType::Text),
        sqlite_column!("end_exec_time", &SqlType::Text),
        sqlite_column!("last_update_time", &SqlType::Text),
        sqlite_column!("heart_beat_time", &SqlType::Text),
        sqlite_column!("site", &SqlType::Text),
        sqlite_column!("user_priority", &SqlType::Integer),
        sqlite_column!("reschedule_time", &SqlType::Text),
    ],
    indices: &[("idx_jobs_status", "status"), ("idx_jobs_owner", "owner")],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute("ALTER TABLE jobs ADD COLUMN reschedule_time TEXT", [])?;
    Ok(())
}

pub const JOB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOBS_TABLE_V1, JOB_JDLS_TABLE_V1, JOB_COMMANDS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[JOBS_TABLE_V2, JOB_JDLS_TABLE_V1, JOB_COMMANDS_TABLE_V1],
        migration: Some(migrate_v1_to_v2),
    },
];
