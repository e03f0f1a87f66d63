use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::field_value::FieldValue;

/// Envelope version for ledgered snapshots. Bump when the field map's
/// encoding changes; historical ledger rows must stay decodable.
pub const SNAPSHOT_SCHEMA_VERSION: u16 = 1;

/// Opaque snapshot of an entity's post-mutation state, as ledgered.
/// The engine treats the field map as data; only the domain layer
/// interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u16,
    pub entity_type: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Snapshot {
    pub fn new(entity_type: &str, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            entity_type: entity_type.to_string(),
            fields,
        }
    }

    pub fn from_pairs(entity_type: &str, pairs: Vec<(&str, FieldValue)>) -> Self {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self::new(entity_type, fields)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
