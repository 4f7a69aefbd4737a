pub mod ctx;
pub mod error;
pub mod mem;
pub mod oracle;
pub mod timestamp;

pub use ctx::{
    CommitCallback, KillTxArg, RetainCause, SubmitLogKind, TxCreateArg, TxCtx, TxCtxStat, TxData,
    TxDataCheck, TxLockStat, TxPhase,
};
pub use error::{TimestampError, TxError, TxResult};
pub use mem::{LocalTsMgr, MemLogAdapter, MemTxCtx};
pub use oracle::{StartWorkingLogCb, TsMgr, TxLogAdapter};
pub use timestamp::{ScnGenerator, TxIdGenerator, TxVersionMgr, global_tx_version_mgr};
