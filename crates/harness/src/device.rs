use std::collections::BTreeMap;

use fieldsync_core::{
    error::CoreError,
    field_value::FieldValue,
    identity::DeviceIdentity,
    ids::*,
    operations::{ClientOperation, EntityKey, OpKind, PushBatch},
    revision::Revision,
    snapshot::Snapshot,
    time::unix_millis_now,
};
use fieldsync_storage::PullEntry;

/// Simulates a field device: buffers operations while offline, signs
/// them into a push batch, and tracks the revisions it has pulled so
/// staged edits carry an honest base revision.
pub struct TestDevice {
    pub identity: DeviceIdentity,
    pub actor_id: ActorId,
    pub facility_id: Option<FacilityId>,
    cursor: Revision,
    known: BTreeMap<EntityKey, Revision>,
    pending: Vec<ClientOperation>,
}

impl TestDevice {
    pub fn new() -> Self {
        Self {
            identity: DeviceIdentity::generate(),
            actor_id: ActorId::new(),
            facility_id: None,
            cursor: Revision::ZERO,
            known: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn at_facility(facility_id: FacilityId) -> Self {
        let mut device = Self::new();
        device.facility_id = Some(facility_id);
        device
    }

    pub fn device_id(&self) -> DeviceId {
        self.identity.device_id()
    }

    pub fn cursor(&self) -> Revision {
        self.cursor
    }

    /// Revision this device last saw for an entity, if it has one locally.
    pub fn known_revision(&self, entity: &EntityKey) -> Option<Revision> {
        self.known.get(entity).copied()
    }

    /// Buffer an upsert for the next batch. The base revision is
    /// whatever this device last pulled for the entity.
    pub fn stage_upsert(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        fields: Vec<(&str, FieldValue)>,
    ) -> Result<OpId, CoreError> {
        let entity = EntityKey::new(entity_type, entity_id);
        let op_id = OpId::new();
        self.pending.push(ClientOperation {
            op_id,
            device_id: self.identity.device_id(),
            actor_id: self.actor_id,
            facility_id: self.facility_id,
            entity: entity.clone(),
            kind: OpKind::Upsert,
            client_updated_at: unix_millis_now()?,
            base_revision: self.known.get(&entity).copied(),
            snapshot: Some(Snapshot::from_pairs(entity_type, fields)),
        });
        Ok(op_id)
    }

    /// Buffer a delete for the next batch.
    pub fn stage_delete(
        &mut self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<OpId, CoreError> {
        let entity = EntityKey::new(entity_type, entity_id);
        let op_id = OpId::new();
        self.pending.push(ClientOperation {
            op_id,
            device_id: self.identity.device_id(),
            actor_id: self.actor_id,
            facility_id: self.facility_id,
            entity: entity.clone(),
            kind: OpKind::Delete,
            client_updated_at: unix_millis_now()?,
            base_revision: self.known.get(&entity).copied(),
            snapshot: None,
        });
        Ok(op_id)
    }

    /// Drain buffered operations into a signed push batch.
    pub fn batch(&mut self, tenant_id: TenantId) -> Result<PushBatch, CoreError> {
        let ops = std::mem::take(&mut self.pending);
        PushBatch::new_signed(&self.identity, tenant_id, ops)
    }

    /// Apply a pulled page to the device's local view: advance the
    /// cursor and record per-entity revisions.
    pub fn apply_pull(&mut self, entries: &[PullEntry]) {
        for entry in entries {
            if entry.revision > self.cursor {
                self.cursor = entry.revision;
            }
            match entry.kind {
                OpKind::Upsert => {
                    self.known.insert(entry.entity.clone(), entry.revision);
                }
                OpKind::Delete => {
                    self.known.remove(&entry.entity);
                }
            }
        }
    }
}

impl Default for TestDevice {
    fn default() -> Self {
        Self::new()
    }
}
