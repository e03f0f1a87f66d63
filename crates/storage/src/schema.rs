use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS tenant_revisions (
    tenant_id BLOB PRIMARY KEY CHECK (length(tenant_id) = 16),
    next_revision INTEGER NOT NULL CHECK (next_revision > 0)
);

CREATE TABLE IF NOT EXISTS ledger (
    rowid INTEGER PRIMARY KEY,
    tenant_id BLOB NOT NULL CHECK (length(tenant_id) = 16),
    revision INTEGER NOT NULL CHECK (revision > 0),
    op_id BLOB NOT NULL CHECK (length(op_id) = 16),
    facility_id BLOB CHECK (facility_id IS NULL OR length(facility_id) = 16),
    device_id BLOB NOT NULL CHECK (length(device_id) = 32),
    actor_id BLOB NOT NULL CHECK (length(actor_id) = 16),
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    op_kind TEXT NOT NULL CHECK (op_kind IN ('upsert', 'delete')),
    base_revision INTEGER,
    client_updated_at INTEGER NOT NULL,
    payload BLOB,
    applied_at INTEGER NOT NULL,
    UNIQUE (tenant_id, revision),
    UNIQUE (tenant_id, op_id)
);
CREATE INDEX IF NOT EXISTS idx_ledger_pull ON ledger (tenant_id, op_kind, revision);
CREATE INDEX IF NOT EXISTS idx_ledger_entity ON ledger (tenant_id, entity_type, entity_id, revision);

CREATE TABLE IF NOT EXISTS tombstones (
    tenant_id BLOB NOT NULL CHECK (length(tenant_id) = 16),
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    facility_id BLOB CHECK (facility_id IS NULL OR length(facility_id) = 16),
    revision INTEGER NOT NULL CHECK (revision > 0),
    deleted_at INTEGER NOT NULL,
    op_id BLOB NOT NULL CHECK (length(op_id) = 16),
    device_id BLOB NOT NULL CHECK (length(device_id) = 32),
    meta BLOB,
    PRIMARY KEY (tenant_id, entity_type, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_tombstones_pull ON tombstones (tenant_id, revision);

CREATE TABLE IF NOT EXISTS conflict_log (
    rowid INTEGER PRIMARY KEY,
    tenant_id BLOB NOT NULL CHECK (length(tenant_id) = 16),
    facility_id BLOB CHECK (facility_id IS NULL OR length(facility_id) = 16),
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    field_key TEXT NOT NULL,
    winning_revision INTEGER NOT NULL,
    winning_op_id BLOB NOT NULL CHECK (length(winning_op_id) = 16),
    losing_revision INTEGER NOT NULL,
    losing_op_id BLOB NOT NULL CHECK (length(losing_op_id) = 16),
    losing_value BLOB,
    winning_value BLOB,
    reason TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    CHECK (winning_revision > losing_revision)
);
CREATE INDEX IF NOT EXISTS idx_conflict_entity ON conflict_log (tenant_id, entity_type, entity_id);

CREATE TABLE IF NOT EXISTS entity_state (
    tenant_id BLOB NOT NULL CHECK (length(tenant_id) = 16),
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    facility_id BLOB CHECK (facility_id IS NULL OR length(facility_id) = 16),
    revision INTEGER NOT NULL CHECK (revision > 0),
    op_id BLOB NOT NULL CHECK (length(op_id) = 16),
    payload BLOB NOT NULL,
    PRIMARY KEY (tenant_id, entity_type, entity_id)
);
";
