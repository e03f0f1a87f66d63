use serde::{Deserialize, Serialize};

use fieldsync_core::{
    ids::*,
    operations::{EntityKey, OpKind},
    revision::Revision,
    snapshot::Snapshot,
};

use crate::error::StorageError;

/// One append-only ledger row: an applied mutation and the snapshot of
/// the state it produced.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub tenant_id: TenantId,
    pub revision: Revision,
    pub op_id: OpId,
    pub facility_id: Option<FacilityId>,
    pub device_id: DeviceId,
    pub actor_id: ActorId,
    pub entity: EntityKey,
    pub kind: OpKind,
    pub base_revision: Option<Revision>,
    pub client_updated_at: i64,
    pub payload: Option<Snapshot>,
    pub applied_at: i64,
}

/// Marker that an entity was deleted, surviving the removal of its
/// primary record so pull clients can drop their local copies.
#[derive(Debug, Clone)]
pub struct TombstoneRecord {
    pub tenant_id: TenantId,
    pub entity: EntityKey,
    pub facility_id: Option<FacilityId>,
    pub revision: Revision,
    pub deleted_at: i64,
    pub op_id: OpId,
    pub device_id: DeviceId,
    pub meta: Option<Vec<u8>>,
}

/// Field-level record of a value overridden during reconciliation.
/// Values are msgpack-encoded [`fieldsync_core::FieldValue`]s; `None`
/// means the side carried no value for the field.
#[derive(Debug, Clone)]
pub struct ConflictAudit {
    pub tenant_id: TenantId,
    pub facility_id: Option<FacilityId>,
    pub entity: EntityKey,
    pub field_key: String,
    pub winning_revision: Revision,
    pub winning_op_id: OpId,
    pub losing_revision: Revision,
    pub losing_op_id: OpId,
    pub losing_value: Option<Vec<u8>>,
    pub winning_value: Option<Vec<u8>>,
    pub reason: String,
    pub created_at: i64,
}

/// Materialized current state of a live entity: the baseline conflict
/// detection compares against, and what synchronous readers see.
#[derive(Debug, Clone)]
pub struct EntityHead {
    pub entity: EntityKey,
    pub facility_id: Option<FacilityId>,
    pub revision: Revision,
    pub op_id: OpId,
    pub snapshot: Snapshot,
}

/// One element of the merged change feed a client consumes. Upserts
/// carry the ledgered snapshot; deletes carry none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullEntry {
    pub revision: Revision,
    pub entity: EntityKey,
    pub kind: OpKind,
    pub payload: Option<Snapshot>,
    pub applied_at: i64,
}

/// Facility visibility applied to read paths. `Facility(f)` sees rows
/// with no facility plus rows at `f`; `All` is the elevated
/// cross-facility view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityFilter {
    All,
    Facility(FacilityId),
}

pub trait SyncStore {
    /// Allocate the next revision for a tenant. Must run inside the
    /// transaction that consumes the value; an aborted transaction
    /// burns it permanently.
    fn allocate_revision(&mut self, tenant_id: TenantId) -> Result<Revision, StorageError>;

    /// Revision previously assigned to `(tenant, op_id)`, if ledgered.
    fn ledgered_revision(
        &self,
        tenant_id: TenantId,
        op_id: OpId,
    ) -> Result<Option<Revision>, StorageError>;

    fn append_ledger(&mut self, entry: &LedgerEntry) -> Result<(), StorageError>;

    fn entity_head(
        &self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Option<EntityHead>, StorageError>;

    fn put_entity_head(
        &mut self,
        tenant_id: TenantId,
        head: &EntityHead,
    ) -> Result<(), StorageError>;

    fn remove_entity_head(
        &mut self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<(), StorageError>;

    fn tombstone(
        &self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Option<TombstoneRecord>, StorageError>;

    /// Insert or monotonically bump a tombstone; a lower-revision
    /// write never overwrites a higher one.
    fn upsert_tombstone(&mut self, record: &TombstoneRecord) -> Result<(), StorageError>;

    fn remove_tombstone(
        &mut self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<(), StorageError>;

    fn insert_conflict(&mut self, record: &ConflictAudit) -> Result<(), StorageError>;

    fn conflicts_for_entity(
        &self,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Vec<ConflictAudit>, StorageError>;

    /// Merged ledger-upsert + tombstone feed: strictly `revision > after`,
    /// ascending, truncated to `limit`, facility-filtered.
    fn pull_page(
        &self,
        tenant_id: TenantId,
        facility: FacilityFilter,
        after: Revision,
        limit: usize,
    ) -> Result<Vec<PullEntry>, StorageError>;

    /// Highest committed revision for a tenant, `Revision::ZERO` if none.
    fn max_revision(&self, tenant_id: TenantId) -> Result<Revision, StorageError>;

    fn ledger_count(&self, tenant_id: TenantId) -> Result<u64, StorageError>;
}
