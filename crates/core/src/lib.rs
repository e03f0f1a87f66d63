pub mod error;
pub mod field_value;
pub mod identity;
pub mod ids;
pub mod operations;
pub mod revision;
pub mod snapshot;
pub mod time;

pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use operations::{ClientOperation, EntityKey, OpKind, PushBatch};
pub use revision::Revision;
pub use snapshot::Snapshot;
