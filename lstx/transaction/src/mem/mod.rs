//! In-memory implementations of the context and of the services around it,
//! used by the admin shell and by tests.

mod ctx;
mod log;
mod ts;

pub use ctx::MemTxCtx;
pub use log::MemLogAdapter;
pub use ts::LocalTsMgr;
