//! Identifiers and log positions shared by every lstx crate.

pub mod scn;
pub mod types;

pub use scn::{MonotonicTs, Scn};
pub use types::{DEFAULT_TENANT_ID, LsId, TabletId, TenantId, TxId};
