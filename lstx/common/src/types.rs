use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a tenant (cluster-wide unique).
pub type TenantId = u64;

/// Tenant id used when none is configured.
pub const DEFAULT_TENANT_ID: TenantId = 1001;

/// Identifier of a log stream, the unit of partitioning and replication.
///
/// Zero is reserved and never names a real log stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LsId(u64);

impl LsId {
    pub const INVALID: LsId = LsId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for LsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique transaction identifier.
///
/// Zero is reserved for "no transaction".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TxId(u64);

impl TxId {
    pub const INVALID: TxId = TxId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a tablet (a physical slice of a table) hosted by a log stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TabletId(u64);

impl TabletId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TabletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids_are_invalid() {
        assert!(!LsId::INVALID.is_valid());
        assert!(!TxId::INVALID.is_valid());
        assert!(LsId::new(1).is_valid());
        assert!(TxId::new(7).is_valid());
        assert_eq!(TxId::new(7).to_string(), "7");
    }
}
