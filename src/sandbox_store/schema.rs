//! SQLite schema definitions for the sandbox metadata database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Sandboxes and their owning entities
// =============================================================================

const SANDBOXES_TABLE_V1: Table = Table {
    name: "sb_sandboxes",
    columns: &[
        sqlite_column!("sb_id", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("owner", &SqlType::Text, non_null = true),
        sqlite_column!("owner_group", &SqlType::Text, non_null = true),
        sqlite_column!("se_pfn", &SqlType::Text, non_null = true),
        sqlite_column!("registration_time", &SqlType::Text, non_null = true),
        sqlite_column!(
            "assigned",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_sb_sandboxes_pfn", "se_pfn")],
};

const SANDBOX_FK: ForeignKey = ForeignKey {
    foreign_table: "sb_sandboxes",
    foreign_column: "sb_id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Links a sandbox to an entity such as `Job:42`
const ENTITY_MAPPING_TABLE_V1: Table = Table {
    name: "sb_entity_mapping",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "sb_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&SANDBOX_FK)
        ),
        sqlite_column!("entity_id", &SqlType::Text, non_null = true),
        sqlite_column!("sb_type", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_sb_entity_mapping_entity", "entity_id")],
};

pub const SANDBOX_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[SANDBOXES_TABLE_V1, ENTITY_MAPPING_TABLE_V1],
    migration: None,
}];
