//! Small identifier types shared across the engine

use serde::{Deserialize, Serialize};

/// Stable numeric table identifier
///
/// Assigned once by provisioning from a persisted high-water counter;
/// never reassigned or reused for the life of the underlying storage.
/// Audit log entries and cross-references key on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(u32);

impl TableId {
    /// Create from a raw id
    #[inline]
    pub const fn from_u32(raw: u32) -> Self {
        TableId(raw)
    }

    /// Get the raw id
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}
