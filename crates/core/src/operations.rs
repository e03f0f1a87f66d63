use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::identity::{verify_signature, DeviceIdentity};
use crate::ids::*;
use crate::revision::Revision;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Upsert,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            _ => Err(CoreError::InvalidData(format!("unknown op kind: {s}"))),
        }
    }
}

/// Identifies a domain entity. The engine never interprets the id; the
/// domain layer owns its format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A single client-originated mutation, buffered on the device while
/// offline and pushed inside a [`PushBatch`] on reconnect.
///
/// `base_revision` is the revision the device believed was current for
/// the entity when it authored the op (None when creating).
/// `client_updated_at` is device wall-clock and untrusted; ordering
/// rests solely on server-assigned revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOperation {
    pub op_id: OpId,
    pub device_id: DeviceId,
    pub actor_id: ActorId,
    pub facility_id: Option<FacilityId>,
    pub entity: EntityKey,
    pub kind: OpKind,
    pub client_updated_at: i64,
    pub base_revision: Option<Revision>,
    pub snapshot: Option<Snapshot>,
}

impl ClientOperation {
    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// A signed batch of operations pushed by one device for one tenant.
/// The checksum covers every operation body; the signature covers the
/// batch header including the checksum, so a tampered batch fails
/// verification before any operation is ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushBatch {
    pub batch_id: BatchId,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub ops: Vec<ClientOperation>,
    pub checksum: [u8; 32],
    pub signature: Signature,
}

impl PushBatch {
    fn checksum_ops(ops: &[ClientOperation]) -> Result<[u8; 32], CoreError> {
        let mut hasher = blake3::Hasher::new();
        for op in ops {
            let bytes = op.to_msgpack()?;
            hasher.update(&bytes);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    fn signing_bytes(
        batch_id: &BatchId,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        op_count: u32,
        checksum: &[u8; 32],
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(batch_id.as_bytes());
        bytes.extend_from_slice(tenant_id.as_bytes());
        bytes.extend_from_slice(device_id.as_bytes());
        bytes.extend_from_slice(&op_count.to_be_bytes());
        bytes.extend_from_slice(checksum);
        bytes
    }

    pub fn new_signed(
        identity: &DeviceIdentity,
        tenant_id: TenantId,
        ops: Vec<ClientOperation>,
    ) -> Result<Self, CoreError> {
        let batch_id = BatchId::new();
        let device_id = identity.device_id();
        let checksum = Self::checksum_ops(&ops)?;
        let signing_bytes = Self::signing_bytes(
            &batch_id,
            &tenant_id,
            &device_id,
            ops.len() as u32,
            &checksum,
        );
        let signature = identity.sign(&signing_bytes);

        Ok(Self {
            batch_id,
            tenant_id,
            device_id,
            ops,
            checksum,
            signature,
        })
    }

    /// Verify batch integrity and authenticity: checksum over operation
    /// bodies, signature against the batch's device key, and that every
    /// operation claims the signing device.
    pub fn verify(&self) -> Result<(), CoreError> {
        let checksum = Self::checksum_ops(&self.ops)?;
        if checksum != self.checksum {
            return Err(CoreError::ChecksumMismatch);
        }
        let signing_bytes = Self::signing_bytes(
            &self.batch_id,
            &self.tenant_id,
            &self.device_id,
            self.ops.len() as u32,
            &self.checksum,
        );
        verify_signature(&self.device_id, &signing_bytes, &self.signature)?;
        for op in &self.ops {
            if op.device_id != self.device_id {
                return Err(CoreError::InvalidOperation(format!(
                    "op {} claims a device other than the batch signer",
                    op.op_id
                )));
            }
        }
        Ok(())
    }
}
