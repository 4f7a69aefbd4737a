//! Per-log-stream transaction context management.
//!
//! Every log stream (shard) replicated on a node has one [`LsTxCtxMgr`]. It
//! keeps the directory of live transaction contexts, drives them through leader
//! and follower role changes, and reports the log positions that checkpointing
//! and recovery depend on. A [`TxCtxMgr`] groups the managers of one tenant.

pub mod aggre;
pub mod config;
pub mod ctx_map;
pub mod iter;
pub mod log_writer;
pub mod ls_tx_ctx_mgr;
pub mod registry;
pub mod stat;
pub mod state;
mod time_guard;

pub use aggre::RecScnAggregate;
pub use config::{LsTxCtxMgrConfig, TxCtxMgrConfig};
pub use ctx_map::{CtxMap, CtxRef, Visit};
pub use iter::LsTxCtxIter;
pub use log_writer::LsLogWriter;
pub use ls_tx_ctx_mgr::{LsTxCtxMgr, SubmitLogFailure};
pub use registry::TxCtxMgr;
pub use stat::LsTxCtxMgrStat;
pub use state::{Op, State, StateHelper};
