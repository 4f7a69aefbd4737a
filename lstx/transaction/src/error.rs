use lstx_common::{LsId, TxId};
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("commit version overflow, reached {0}")]
    CommitVersionOverflow(u64),

    #[error("txn-id overflow, reached {0}")]
    TxIdOverflow(u64),
}

/// Errors surfaced by the transaction-context control plane.
///
/// The admission family (`NotMaster`, `Blocked`, `Stopped`, `StateNotMatch`) is
/// expected during role changes and always recoverable by retrying, redirecting
/// or backing off. `CtxNotExist` is an expected race between a lookup and a
/// transaction finishing. `Unexpected` marks a broken invariant.
#[derive(Error, Debug, Diagnostic)]
pub enum TxError {
    #[error("log stream is not master")]
    #[diagnostic(help("redirect the request to the current leader"))]
    NotMaster,

    #[error("log stream {0} is blocked")]
    Blocked(LsId),

    #[error("log stream {0} is stopped")]
    Stopped(LsId),

    #[error("state not match: {0}")]
    StateNotMatch(String),

    #[error("transaction context {0} does not exist")]
    CtxNotExist(TxId),

    #[error("entry already exists: {0}")]
    EntryExist(String),

    #[error("log stream {0} does not exist")]
    LsNotExist(LsId),

    #[error("log stream {0} has not been stopped")]
    LsNotStopped(LsId),

    #[error("try again later: {0}")]
    Again(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transaction context manager is not running")]
    NotRunning,

    #[error("transaction context manager is already running")]
    AlreadyRunning,

    #[error("global timestamp is not ready yet")]
    GtsNotReady,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("log stream {0} must be revoked")]
    NeedRevoke(LsId),

    #[error("unexpected error: {0}")]
    Unexpected(String),

    #[error("timestamp error")]
    Timestamp(#[from] TimestampError),
}

impl TxError {
    /// Whether the caller is expected to retry (possibly elsewhere or later).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxError::NotMaster
                | TxError::Blocked(_)
                | TxError::Stopped(_)
                | TxError::StateNotMatch(_)
                | TxError::Again(_)
                | TxError::Timeout(_)
                | TxError::GtsNotReady
        )
    }
}

pub type TxResult<T> = std::result::Result<T, TxError>;
