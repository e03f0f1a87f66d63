use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-tenant sequence number assigned when an operation is ledgered.
/// Revisions totally order all mutations within a tenant; no ordering
/// exists across tenants. Allocation starts at 1; gaps are permitted
/// (an aborted ingest burns its value) but values never repeat.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Revision(u64);

impl Revision {
    /// The cursor meaning "from the beginning": no revision has been seen.
    pub const ZERO: Revision = Revision(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Revision({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
