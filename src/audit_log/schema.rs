//! SQLite schema definitions for the job logging database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Status transition log
// =============================================================================

const LOGGING_TABLE_V1: Table = Table {
    name: "logging_info",
    columns: &[
        sqlite_column!("seq_num", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("job_id", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("minor_status", &SqlType::Text, non_null = true),
        sqlite_column!("application_status", &SqlType::Text, non_null = true),
        sqlite_column!("status_time", &SqlType::Text, non_null = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_logging_info_job_id", "job_id"),
        ("idx_logging_info_job_status", "job_id, status"),
    ],
};

pub const LOGGING_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[LOGGING_TABLE_V1],
    migration: None,
}];
