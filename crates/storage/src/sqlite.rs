use rusqlite::Connection;

use fieldsync_core::{
    ids::*,
    operations::{EntityKey, OpKind},
    revision::Revision,
    snapshot::Snapshot,
};

use crate::error::StorageError;
use crate::traits::{
    ConflictAudit, EntityHead, FacilityFilter, LedgerEntry, PullEntry, SyncStore,
    TombstoneRecord,
};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn read_facility(bytes: Option<Vec<u8>>) -> Result<Option<FacilityId>, StorageError> {
    match bytes {
        Some(b) => Ok(Some(FacilityId::from_bytes(to_array::<16>(b, "facility_id")?))),
        None => Ok(None),
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn read_pull_entry(
    row: (i64, String, String, String, Option<Vec<u8>>, i64),
) -> Result<PullEntry, StorageError> {
    let (revision, entity_type, entity_id, op_kind, payload_bytes, applied_at) = row;
    let kind = OpKind::parse(&op_kind)?;
    let payload = match payload_bytes {
        Some(bytes) => Some(Snapshot::from_msgpack(&bytes)?),
        None => None,
    };
    Ok(PullEntry {
        revision: Revision::new(revision as u64),
        entity: EntityKey {
            entity_type,
            entity_id,
        },
        kind,
        payload,
        applied_at,
    })
}

const PULL_SQL_ALL: &str = "
SELECT revision, entity_type, entity_id, op_kind, payload, applied_at
  FROM ledger
 WHERE tenant_id = ?1 AND op_kind = 'upsert' AND revision > ?2
UNION ALL
SELECT revision, entity_type, entity_id, 'delete', NULL, deleted_at
  FROM tombstones
 WHERE tenant_id = ?1 AND revision > ?2
 ORDER BY revision
 LIMIT ?3";

const PULL_SQL_FACILITY: &str = "
SELECT revision, entity_type, entity_id, op_kind, payload, applied_at
  FROM ledger
 WHERE tenant_id = ?1 AND op_kind = 'upsert' AND revision > ?2
   AND (facility_id IS NULL OR facility_id = ?4)
UNION ALL
SELECT revision, entity_type, entity_id, 'delete', NULL, deleted_at
  FROM tombstones
 WHERE tenant_id = ?1 AND revision > ?2
   AND (facility_id IS NULL OR facility_id = ?4)
 ORDER BY revision
 LIMIT ?3";

impl SyncStore for SqliteStore {
    fn allocate_revision(&mut self, tenant_id: TenantId) -> Result<Revision, StorageError> {
        // Single-row upsert-and-read: lazily seeds the counter at first
        // allocation and serializes concurrent callers on the row lock.
        let revision: i64 = self.conn.query_row(
            "INSERT INTO tenant_revisions (tenant_id, next_revision) VALUES (?1, 2)
             ON CONFLICT(tenant_id) DO UPDATE SET next_revision = next_revision + 1
             RETURNING next_revision - 1",
            rusqlite::params![tenant_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(Revision::new(revision as u64))
    }

    fn ledgered_revision(
        &self,
        tenant_id: TenantId,
        op_id: OpId,
    ) -> Result<Option<Revision>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT revision FROM ledger WHERE tenant_id = ?1 AND op_id = ?2")?;
        let mut rows = stmt.query_map(
            rusqlite::params![tenant_id.as_bytes().as_slice(), op_id.as_bytes().as_slice()],
            |row| row.get::<_, i64>(0),
        )?;

        match rows.next() {
            Some(Ok(revision)) => Ok(Some(Revision::new(revision as u64))),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn append_ledger(&mut self, entry: &LedgerEntry) -> Result<(), StorageError> {
        let payload_bytes = match &entry.payload {
            Some(snapshot) => Some(snapshot.to_msgpack()?),
            None => None,
        };
        let result = self.conn.execute(
            "INSERT INTO ledger (tenant_id, revision, op_id, facility_id, device_id, actor_id,
                                 entity_type, entity_id, op_kind, base_revision,
                                 client_updated_at, payload, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                entry.tenant_id.as_bytes().as_slice(),
                entry.revision.value() as i64,
                entry.op_id.as_bytes().as_slice(),
                entry.facility_id.as_ref().map(|f| f.as_bytes().as_slice()),
                entry.device_id.as_bytes().as_slice(),
                entry.actor_id.as_bytes().as_slice(),
                entry.entity.entity_type,
                entry.entity.entity_id,
                entry.kind.as_str(),
                entry.base_revision.map(|r| r.value() as i64),
                entry.client_updated_at,
                payload_bytes,
                entry.applied_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::ConstraintViolation(format!(
                    "ledger append for op {} at revision {}",
                    entry.op_id, entry.revision
                )))
            }
            Err(e) => Err(StorageError::Sqlite(e)),
        }
    }

    fn entity_head(
        &self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Option<EntityHead>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT facility_id, revision, op_id, payload FROM entity_state
             WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3",
        )?;
        let mut rows = stmt.query_map(
            rusqlite::params![
                tenant_id.as_bytes().as_slice(),
                entity.entity_type,
                entity.entity_id
            ],
            |row| {
                let facility: Option<Vec<u8>> = row.get(0)?;
                let revision: i64 = row.get(1)?;
                let op_id: Vec<u8> = row.get(2)?;
                let payload: Vec<u8> = row.get(3)?;
                Ok((facility, revision, op_id, payload))
            },
        )?;

        match rows.next() {
            Some(Ok((facility, revision, op_id, payload))) => Ok(Some(EntityHead {
                entity: entity.clone(),
                facility_id: read_facility(facility)?,
                revision: Revision::new(revision as u64),
                op_id: OpId::from_bytes(to_array::<16>(op_id, "op_id")?),
                snapshot: Snapshot::from_msgpack(&payload)?,
            })),
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn put_entity_head(
        &mut self,
        tenant_id: TenantId,
        head: &EntityHead,
    ) -> Result<(), StorageError> {
        let payload_bytes = head.snapshot.to_msgpack()?;
        self.conn.execute(
            "INSERT INTO entity_state (tenant_id, entity_type, entity_id, facility_id, revision, op_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(tenant_id, entity_type, entity_id) DO UPDATE SET
                 facility_id = excluded.facility_id,
                 revision = excluded.revision,
                 op_id = excluded.op_id,
                 payload = excluded.payload",
            rusqlite::params![
                tenant_id.as_bytes().as_slice(),
                head.entity.entity_type,
                head.entity.entity_id,
                head.facility_id.as_ref().map(|f| f.as_bytes().as_slice()),
                head.revision.value() as i64,
                head.op_id.as_bytes().as_slice(),
                payload_bytes,
            ],
        )?;
        Ok(())
    }

    fn remove_entity_head(
        &mut self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM entity_state WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3",
            rusqlite::params![
                tenant_id.as_bytes().as_slice(),
                entity.entity_type,
                entity.entity_id
            ],
        )?;
        Ok(())
    }

    fn tombstone(
        &self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Option<TombstoneRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT facility_id, revision, deleted_at, op_id, device_id, meta FROM tombstones
             WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3",
        )?;
        let mut rows = stmt.query_map(
            rusqlite::params![
                tenant_id.as_bytes().as_slice(),
                entity.entity_type,
                entity.entity_id
            ],
            |row| {
                let facility: Option<Vec<u8>> = row.get(0)?;
                let revision: i64 = row.get(1)?;
                let deleted_at: i64 = row.get(2)?;
                let op_id: Vec<u8> = row.get(3)?;
                let device_id: Vec<u8> = row.get(4)?;
                let meta: Option<Vec<u8>> = row.get(5)?;
                Ok((facility, revision, deleted_at, op_id, device_id, meta))
            },
        )?;

        match rows.next() {
            Some(Ok((facility, revision, deleted_at, op_id, device_id, meta))) => {
                Ok(Some(TombstoneRecord {
                    tenant_id,
                    entity: entity.clone(),
                    facility_id: read_facility(facility)?,
                    revision: Revision::new(revision as u64),
                    deleted_at,
                    op_id: OpId::from_bytes(to_array::<16>(op_id, "op_id")?),
                    device_id: DeviceId::from_bytes(to_array::<32>(device_id, "device_id")?),
                    meta,
                }))
            }
            Some(Err(e)) => Err(StorageError::Sqlite(e)),
            None => Ok(None),
        }
    }

    fn upsert_tombstone(&mut self, record: &TombstoneRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO tombstones (tenant_id, entity_type, entity_id, facility_id, revision,
                                     deleted_at, op_id, device_id, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(tenant_id, entity_type, entity_id) DO UPDATE SET
                 facility_id = excluded.facility_id,
                 revision = excluded.revision,
                 deleted_at = excluded.deleted_at,
                 op_id = excluded.op_id,
                 device_id = excluded.device_id,
                 meta = excluded.meta
             WHERE excluded.revision > tombstones.revision",
            rusqlite::params![
                record.tenant_id.as_bytes().as_slice(),
                record.entity.entity_type,
                record.entity.entity_id,
                record.facility_id.as_ref().map(|f| f.as_bytes().as_slice()),
                record.revision.value() as i64,
                record.deleted_at,
                record.op_id.as_bytes().as_slice(),
                record.device_id.as_bytes().as_slice(),
                record.meta.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn remove_tombstone(
        &mut self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM tombstones WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3",
            rusqlite::params![
                tenant_id.as_bytes().as_slice(),
                entity.entity_type,
                entity.entity_id
            ],
        )?;
        Ok(())
    }

    fn insert_conflict(&mut self, record: &ConflictAudit) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO conflict_log (tenant_id, facility_id, entity_type, entity_id, field_key,
                                       winning_revision, winning_op_id, losing_revision,
                                       losing_op_id, losing_value, winning_value, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                record.tenant_id.as_bytes().as_slice(),
                record.facility_id.as_ref().map(|f| f.as_bytes().as_slice()),
                record.entity.entity_type,
                record.entity.entity_id,
                record.field_key,
                record.winning_revision.value() as i64,
                record.winning_op_id.as_bytes().as_slice(),
                record.losing_revision.value() as i64,
                record.losing_op_id.as_bytes().as_slice(),
                record.losing_value.as_deref(),
                record.winning_value.as_deref(),
                record.reason,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn conflicts_for_entity(
        &self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Vec<ConflictAudit>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT facility_id, field_key, winning_revision, winning_op_id, losing_revision,
                    losing_op_id, losing_value, winning_value, reason, created_at
               FROM conflict_log
              WHERE tenant_id = ?1 AND entity_type = ?2 AND entity_id = ?3
              ORDER BY rowid",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                tenant_id.as_bytes().as_slice(),
                entity.entity_type,
                entity.entity_id
            ],
            |row| {
                let facility: Option<Vec<u8>> = row.get(0)?;
                let field_key: String = row.get(1)?;
                let winning_revision: i64 = row.get(2)?;
                let winning_op_id: Vec<u8> = row.get(3)?;
                let losing_revision: i64 = row.get(4)?;
                let losing_op_id: Vec<u8> = row.get(5)?;
                let losing_value: Option<Vec<u8>> = row.get(6)?;
                let winning_value: Option<Vec<u8>> = row.get(7)?;
                let reason: String = row.get(8)?;
                let created_at: i64 = row.get(9)?;
                Ok((
                    facility,
                    field_key,
                    winning_revision,
                    winning_op_id,
                    losing_revision,
                    losing_op_id,
                    losing_value,
                    winning_value,
                    reason,
                    created_at,
                ))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (
                facility,
                field_key,
                winning_revision,
                winning_op_id,
                losing_revision,
                losing_op_id,
                losing_value,
                winning_value,
                reason,
                created_at,
            ) = row?;
            result.push(ConflictAudit {
                tenant_id,
                facility_id: read_facility(facility)?,
                entity: entity.clone(),
                field_key,
                winning_revision: Revision::new(winning_revision as u64),
                winning_op_id: OpId::from_bytes(to_array::<16>(winning_op_id, "winning_op_id")?),
                losing_revision: Revision::new(losing_revision as u64),
                losing_op_id: OpId::from_bytes(to_array::<16>(losing_op_id, "losing_op_id")?),
                losing_value,
                winning_value,
                reason,
                created_at,
            });
        }
        Ok(result)
    }

    fn pull_page(
        &self,
        tenant_id: TenantId,
        facility: FacilityFilter,
        after: Revision,
        limit: usize,
    ) -> Result<Vec<PullEntry>, StorageError> {
        fn map_row(
            row: &rusqlite::Row,
        ) -> rusqlite::Result<(i64, String, String, String, Option<Vec<u8>>, i64)> {
            let revision: i64 = row.get(0)?;
            let entity_type: String = row.get(1)?;
            let entity_id: String = row.get(2)?;
            let op_kind: String = row.get(3)?;
            let payload: Option<Vec<u8>> = row.get(4)?;
            let applied_at: i64 = row.get(5)?;
            Ok((revision, entity_type, entity_id, op_kind, payload, applied_at))
        }

        let raw: Vec<(i64, String, String, String, Option<Vec<u8>>, i64)> = match facility {
            FacilityFilter::All => {
                let mut stmt = self.conn.prepare(PULL_SQL_ALL)?;
                let rows = stmt.query_map(
                    rusqlite::params![
                        tenant_id.as_bytes().as_slice(),
                        after.value() as i64,
                        limit as i64,
                    ],
                    map_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            FacilityFilter::Facility(facility_id) => {
                let mut stmt = self.conn.prepare(PULL_SQL_FACILITY)?;
                let rows = stmt.query_map(
                    rusqlite::params![
                        tenant_id.as_bytes().as_slice(),
                        after.value() as i64,
                        limit as i64,
                        facility_id.as_bytes().as_slice(),
                    ],
                    map_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        raw.into_iter().map(read_pull_entry).collect()
    }

    fn max_revision(&self, tenant_id: TenantId) -> Result<Revision, StorageError> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(revision) FROM ledger WHERE tenant_id = ?1",
            rusqlite::params![tenant_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(Revision::new(max.unwrap_or(0) as u64))
    }

    fn ledger_count(&self, tenant_id: TenantId) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger WHERE tenant_id = ?1",
            rusqlite::params![tenant_id.as_bytes().as_slice()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
