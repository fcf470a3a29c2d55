//! SQLite schema definitions for the task queue database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Queues and membership
// =============================================================================

const TASK_QUEUES_TABLE_V1: Table = Table {
    name: "task_queues",
    columns: &[
        sqlite_column!("tq_id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("owner", &SqlType::Text, non_null = true),
        sqlite_column!("owner_group", &SqlType::Text, non_null = true),
        sqlite_column!("vo", &SqlType::Text, non_null = true),
        sqlite_column!("cpu_time", &SqlType::Integer, non_null = true),
        sqlite_column!("requirements", &SqlType::Text, non_null = true),
        sqlite_column!(
            "priority",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "enabled",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
    ],
    indices: &[("idx_task_queues_entity", "owner_group, owner")],
};

const TASK_QUEUE_FK: ForeignKey = ForeignKey {
    foreign_table: "task_queues",
    foreign_column: "tq_id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const TQ_JOBS_TABLE_V1: Table = Table {
    name: "tq_jobs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "tq_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TASK_QUEUE_FK)
        ),
        sqlite_column!("priority", &SqlType::Integer, non_null = true),
        sqlite_column!("real_priority", &SqlType::Real, non_null = true),
    ],
    indices: &[("idx_tq_jobs_tq_id", "tq_id")],
};

pub const TASK_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[TASK_QUEUES_TABLE_V1, TQ_JOBS_TABLE_V1],
    migration: None,
}];
