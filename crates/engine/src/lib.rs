pub mod config;
pub mod error;
pub mod scope;

pub use config::EngineConfig;
pub use error::EngineError;
pub use scope::CallerScope;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fieldsync_core::{
    ids::*,
    operations::{ClientOperation, EntityKey, OpKind, PushBatch},
    revision::Revision,
    snapshot::Snapshot,
    time::unix_millis_now,
};
use fieldsync_storage::{
    ConflictAudit, EntityHead, LedgerEntry, PullEntry, SqliteStore, SyncStore, TombstoneRecord,
};

/// Per-operation result of a push batch, reported back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Applied,
    AlreadyApplied,
    ConflictResolved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpOutcome {
    pub op_id: OpId,
    pub assigned_revision: Option<Revision>,
    pub status: OpStatus,
    pub reason: Option<String>,
}

impl OpOutcome {
    fn applied(op_id: OpId, revision: Revision) -> Self {
        Self {
            op_id,
            assigned_revision: Some(revision),
            status: OpStatus::Applied,
            reason: None,
        }
    }

    fn already_applied(op_id: OpId, revision: Revision) -> Self {
        Self {
            op_id,
            assigned_revision: Some(revision),
            status: OpStatus::AlreadyApplied,
            reason: None,
        }
    }

    fn conflict_resolved(op_id: OpId, revision: Revision) -> Self {
        Self {
            op_id,
            assigned_revision: Some(revision),
            status: OpStatus::ConflictResolved,
            reason: None,
        }
    }

    fn rejected(op_id: OpId, reason: String) -> Self {
        Self {
            op_id,
            assigned_revision: None,
            status: OpStatus::Rejected,
            reason: Some(reason),
        }
    }
}

/// Server-side coordinator: ingests device push batches into the
/// per-tenant ledger and serves the cursor-based pull feed.
pub struct SyncEngine {
    storage: SqliteStore,
    config: EngineConfig,
}

impl SyncEngine {
    pub fn new(storage: SqliteStore) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    pub fn with_config(storage: SqliteStore, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &SqliteStore {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStore {
        &mut self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a batch SQL statement on the underlying connection, mapping errors.
    fn exec_batch(&self, sql: &str) -> Result<(), EngineError> {
        self.storage
            .conn()
            .execute_batch(sql)
            .map_err(|e| EngineError::Storage(fieldsync_storage::StorageError::Sqlite(e)))
    }

    // ========================================================================
    // Push (ingest)
    // ========================================================================

    /// Ingest a device's push batch. Scope is checked for every
    /// operation before any revision is allocated, so an out-of-scope
    /// batch is never partially applied; after that, each operation
    /// runs in its own transaction and domain-level rejections are
    /// isolated per op.
    pub fn ingest_batch(
        &mut self,
        scope: &CallerScope,
        batch: &PushBatch,
    ) -> Result<Vec<OpOutcome>, EngineError> {
        scope.authorize_tenant(batch.tenant_id)?;
        for op in &batch.ops {
            scope.authorize_facility(op.facility_id)?;
        }
        if self.config.verify_signatures {
            batch
                .verify()
                .map_err(|e| EngineError::BatchRejected(e.to_string()))?;
        }

        let mut outcomes = Vec::with_capacity(batch.ops.len());
        for op in &batch.ops {
            outcomes.push(self.ingest_op(batch.tenant_id, op)?);
        }
        debug!(batch = %batch.batch_id, ops = batch.ops.len(), "ingested push batch");
        Ok(outcomes)
    }

    /// Ingest one operation in its own transaction. A rejection commits
    /// nothing and burns no revision; an infrastructure error rolls
    /// back and propagates to the caller.
    fn ingest_op(
        &mut self,
        tenant_id: TenantId,
        op: &ClientOperation,
    ) -> Result<OpOutcome, EngineError> {
        self.exec_batch("BEGIN IMMEDIATE")?;

        let result = (|| -> Result<OpOutcome, EngineError> {
            // Idempotent replay: the op is already ledgered, return its
            // original revision without writing anything.
            if let Some(revision) = self.storage.ledgered_revision(tenant_id, op.op_id)? {
                return Ok(OpOutcome::already_applied(op.op_id, revision));
            }

            match op.kind {
                OpKind::Upsert => self.ingest_upsert(tenant_id, op),
                OpKind::Delete => self.ingest_delete(tenant_id, op),
            }
        })();

        match result {
            Ok(outcome) => {
                self.exec_batch("COMMIT")?;
                if outcome.status == OpStatus::Rejected {
                    warn!(
                        op = %op.op_id,
                        entity = %op.entity,
                        reason = outcome.reason.as_deref().unwrap_or(""),
                        "operation rejected"
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.exec_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    fn ingest_upsert(
        &mut self,
        tenant_id: TenantId,
        op: &ClientOperation,
    ) -> Result<OpOutcome, EngineError> {
        let incoming = match &op.snapshot {
            Some(snapshot) => snapshot,
            None => {
                return Ok(OpOutcome::rejected(
                    op.op_id,
                    "upsert carries no snapshot".into(),
                ));
            }
        };
        if incoming.entity_type != op.entity.entity_type {
            return Ok(OpOutcome::rejected(
                op.op_id,
                format!(
                    "snapshot entity type {} does not match {}",
                    incoming.entity_type, op.entity.entity_type
                ),
            ));
        }

        let head = self.storage.entity_head(tenant_id, &op.entity)?;
        let tombstone = self.storage.tombstone(tenant_id, &op.entity)?;

        let revision = self.storage.allocate_revision(tenant_id)?;
        let applied_at = unix_millis_now()?;

        // Field-level reconciliation against the current head. The
        // incoming op holds the freshly allocated (highest) revision,
        // so every field it carries wins; fields it does not carry
        // survive from the head. When the device's base revision is
        // behind the head, each overridden value is audited.
        let mut conflict_fields = Vec::new();
        let merged = match &head {
            Some(head) => {
                let stale = match op.base_revision {
                    Some(base) => base < head.revision,
                    None => true,
                };
                let mut fields = head.snapshot.fields.clone();
                for (key, value) in &incoming.fields {
                    if stale
                        && let Some(prior) = head.snapshot.fields.get(key)
                        && prior != value
                    {
                        conflict_fields.push((key.clone(), prior.clone(), value.clone()));
                    }
                    fields.insert(key.clone(), value.clone());
                }
                Snapshot {
                    schema_version: incoming.schema_version,
                    entity_type: incoming.entity_type.clone(),
                    fields,
                }
            }
            None => incoming.clone(),
        };

        let facility_id = op.facility_id.or(head.as_ref().and_then(|h| h.facility_id));

        if let Some(head) = &head {
            let base = op.base_revision.unwrap_or(Revision::ZERO);
            for (field_key, losing, winning) in &conflict_fields {
                let losing_value = losing.to_msgpack().map_err(|e| {
                    EngineError::Core(fieldsync_core::CoreError::Serialization(e.to_string()))
                })?;
                let winning_value = winning.to_msgpack().map_err(|e| {
                    EngineError::Core(fieldsync_core::CoreError::Serialization(e.to_string()))
                })?;
                self.storage.insert_conflict(&ConflictAudit {
                    tenant_id,
                    facility_id,
                    entity: op.entity.clone(),
                    field_key: field_key.clone(),
                    winning_revision: revision,
                    winning_op_id: op.op_id,
                    losing_revision: head.revision,
                    losing_op_id: head.op_id,
                    losing_value: Some(losing_value),
                    winning_value: Some(winning_value),
                    reason: format!(
                        "base revision {} behind head revision {}",
                        base, head.revision
                    ),
                    created_at: applied_at,
                })?;
            }
        }

        self.storage.append_ledger(&LedgerEntry {
            tenant_id,
            revision,
            op_id: op.op_id,
            facility_id,
            device_id: op.device_id,
            actor_id: op.actor_id,
            entity: op.entity.clone(),
            kind: OpKind::Upsert,
            base_revision: op.base_revision,
            client_updated_at: op.client_updated_at,
            payload: Some(merged.clone()),
            applied_at,
        })?;

        self.storage.put_entity_head(
            tenant_id,
            &EntityHead {
                entity: op.entity.clone(),
                facility_id,
                revision,
                op_id: op.op_id,
                snapshot: merged,
            },
        )?;

        // A re-created entity stops being deleted: drop the tombstone
        // so pull clients see only the new upsert.
        if tombstone.is_some() {
            self.storage.remove_tombstone(tenant_id, &op.entity)?;
        }

        if conflict_fields.is_empty() {
            Ok(OpOutcome::applied(op.op_id, revision))
        } else {
            debug!(
                op = %op.op_id,
                entity = %op.entity,
                fields = conflict_fields.len(),
                "resolved concurrent edit by revision order"
            );
            Ok(OpOutcome::conflict_resolved(op.op_id, revision))
        }
    }

    fn ingest_delete(
        &mut self,
        tenant_id: TenantId,
        op: &ClientOperation,
    ) -> Result<OpOutcome, EngineError> {
        let head = self.storage.entity_head(tenant_id, &op.entity)?;
        let tombstone = self.storage.tombstone(tenant_id, &op.entity)?;
        if head.is_none() && tombstone.is_none() {
            return Ok(OpOutcome::rejected(
                op.op_id,
                format!("unknown entity {}", op.entity),
            ));
        }

        let revision = self.storage.allocate_revision(tenant_id)?;
        let applied_at = unix_millis_now()?;
        let facility_id = op
            .facility_id
            .or(head.as_ref().and_then(|h| h.facility_id))
            .or(tombstone.as_ref().and_then(|t| t.facility_id));

        self.storage.append_ledger(&LedgerEntry {
            tenant_id,
            revision,
            op_id: op.op_id,
            facility_id,
            device_id: op.device_id,
            actor_id: op.actor_id,
            entity: op.entity.clone(),
            kind: OpKind::Delete,
            base_revision: op.base_revision,
            client_updated_at: op.client_updated_at,
            payload: None,
            applied_at,
        })?;

        // Deletions are idempotent and monotone: a repeat delete bumps
        // the tombstone to the new revision, never lowers it.
        self.storage.upsert_tombstone(&TombstoneRecord {
            tenant_id,
            entity: op.entity.clone(),
            facility_id,
            revision,
            deleted_at: applied_at,
            op_id: op.op_id,
            device_id: op.device_id,
            meta: None,
        })?;

        if head.is_some() {
            self.storage.remove_entity_head(tenant_id, &op.entity)?;
        }

        Ok(OpOutcome::applied(op.op_id, revision))
    }

    // ========================================================================
    // Pull
    // ========================================================================

    /// Serve one page of the merged change feed: ledger upserts and
    /// tombstones with revision strictly greater than `after`,
    /// ascending, truncated to the configured page cap. Clients persist
    /// the highest revision they applied and pass it back as `after`.
    pub fn pull(
        &self,
        scope: &CallerScope,
        tenant_id: TenantId,
        after: Revision,
        limit: Option<usize>,
    ) -> Result<Vec<PullEntry>, EngineError> {
        scope.authorize_tenant(tenant_id)?;
        let limit = limit
            .unwrap_or(self.config.default_pull_limit)
            .clamp(1, self.config.max_pull_limit);
        let entries = self
            .storage
            .pull_page(tenant_id, scope.facility_filter(), after, limit)?;
        debug!(tenant = %tenant_id, after = %after, entries = entries.len(), "served pull page");
        Ok(entries)
    }

    // ========================================================================
    // Synchronous reads
    // ========================================================================

    /// Current materialized state of an entity, if live and visible to
    /// the caller.
    pub fn head(
        &self,
        scope: &CallerScope,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Option<EntityHead>, EngineError> {
        scope.authorize_tenant(tenant_id)?;
        let head = self.storage.entity_head(tenant_id, entity)?;
        Ok(head.filter(|h| scope.can_see_facility(h.facility_id)))
    }

    /// Audit trail of overridden values for an entity, for operator
    /// review and manual recovery.
    pub fn conflicts_for_entity(
        &self,
        scope: &CallerScope,
        tenant_id: TenantId,
        entity: &EntityKey,
    ) -> Result<Vec<ConflictAudit>, EngineError> {
        scope.authorize_tenant(tenant_id)?;
        let records = self.storage.conflicts_for_entity(tenant_id, entity)?;
        Ok(records
            .into_iter()
            .filter(|r| scope.can_see_facility(r.facility_id))
            .collect())
    }

    /// Highest committed revision for a tenant, `Revision::ZERO` if the
    /// ledger is empty.
    pub fn max_revision(
        &self,
        scope: &CallerScope,
        tenant_id: TenantId,
    ) -> Result<Revision, EngineError> {
        scope.authorize_tenant(tenant_id)?;
        Ok(self.storage.max_revision(tenant_id)?)
    }
}
