use clap::Subcommand;
use lstx_common::{LsId, Scn, TabletId, TxId};
use miette::Result;

use crate::session::AdminSession;
use crate::shell::output::{LockRow, LsRow, OutputMode, TxRow};

/// Commands operating on the in-memory tenant.
#[derive(Debug, Subcommand)]
pub(crate) enum AdminCommand {
    /// Register a log stream; it starts as follower.
    CreateLs { ls: u64 },

    /// Stop a log stream, wait for it to drain and unregister it.
    RemoveLs {
        ls: u64,
        #[arg(long)]
        graceful: bool,
    },

    /// Elect this replica and begin the leader takeover.
    Takeover { ls: u64 },

    /// Resolve queued start-working logs.
    ApplyLog {
        ls: u64,
        /// Make the log layer report a failure instead.
        #[arg(long)]
        fail: bool,
        /// Resolve every queued log, not just the oldest.
        #[arg(long)]
        all: bool,
    },

    /// Revoke the leader role.
    Revoke {
        ls: u64,
        #[arg(long)]
        graceful: bool,
    },

    /// Re-enter the leader role after a revoke.
    Resume { ls: u64 },

    /// Stop admitting new transactions.
    Block { ls: u64 },

    /// Bring a blocked follower back online.
    Online { ls: u64 },

    /// Stop the log stream and kill its transactions.
    Stop {
        ls: u64,
        #[arg(long)]
        graceful: bool,
    },

    /// Kill every transaction without changing the role.
    KillAll {
        ls: u64,
        #[arg(long)]
        graceful: bool,
    },

    /// Create a transaction, or find it during replay.
    ///
    /// Without a transaction id the next free one is used.
    Begin {
        ls: u64,
        tx: Option<u64>,
        #[arg(long)]
        replay: bool,
    },

    /// Log a write of a transaction to a tablet.
    Write {
        ls: u64,
        tx: u64,
        tablet: u64,
        schema_version: i64,
        modify_time: i64,
    },

    /// Prepare a transaction at a prepare version.
    Prepare { ls: u64, tx: u64, version: u64 },

    /// Commit a transaction and drop it from the directory.
    Commit { ls: u64, tx: u64, version: u64 },

    /// Abort a transaction and drop it from the directory.
    Abort { ls: u64, tx: u64 },

    /// Give a transaction handle back.
    Release { ls: u64, tx: u64 },

    /// Print the recycle position of a log stream.
    RecScn { ls: u64 },

    /// Start a checkpoint of the transaction context table.
    RefreshAggre { ls: u64 },

    /// Finish a checkpoint of the transaction context table.
    Flushed { ls: u64 },

    /// List the log streams.
    Ls,

    /// List transactions, of one log stream or all of them.
    Tx { ls: Option<u64> },

    /// List the tablets locked by the transactions of a log stream.
    Locks { ls: u64 },

    /// Dump one transaction.
    Dump { ls: u64, tx: u64 },
}

impl AdminCommand {
    /// Run the command, returning the text to print, if any.
    pub fn execute(self, session: &mut AdminSession, mode: OutputMode) -> Result<Option<String>> {
        let output = match self {
            AdminCommand::CreateLs { ls } => {
                session.create_ls(LsId::new(ls))?;
                None
            }
            AdminCommand::RemoveLs { ls, graceful } => {
                session.remove_ls(LsId::new(ls), graceful)?;
                None
            }
            AdminCommand::Takeover { ls } => {
                session.takeover(LsId::new(ls))?;
                None
            }
            AdminCommand::ApplyLog { ls, fail, all } => {
                let resolved = session.apply_log(LsId::new(ls), !fail, all)?;
                Some(format!("resolved {resolved} start working log(s)"))
            }
            AdminCommand::Revoke { ls, graceful } => {
                session.revoke(LsId::new(ls), graceful)?;
                None
            }
            AdminCommand::Resume { ls } => {
                session.resume(LsId::new(ls))?;
                None
            }
            AdminCommand::Block { ls } => {
                let drained = session.block(LsId::new(ls))?;
                Some(format!("drained: {drained}"))
            }
            AdminCommand::Online { ls } => {
                session.online(LsId::new(ls))?;
                None
            }
            AdminCommand::Stop { ls, graceful } => {
                session.stop(LsId::new(ls), graceful)?;
                None
            }
            AdminCommand::KillAll { ls, graceful } => {
                let cleaned = session.kill_all(LsId::new(ls), graceful)?;
                Some(format!("all cleaned: {cleaned}"))
            }
            AdminCommand::Begin { ls, tx, replay } => {
                let (tx_id, existed) = session.begin(LsId::new(ls), tx.map(TxId::new), replay)?;
                if existed {
                    Some(format!("tx {tx_id} already exists"))
                } else {
                    tx.is_none().then(|| format!("began tx {tx_id}"))
                }
            }
            AdminCommand::Write {
                ls,
                tx,
                tablet,
                schema_version,
                modify_time,
            } => {
                let scn = session.write(
                    LsId::new(ls),
                    TxId::new(tx),
                    TabletId::new(tablet),
                    schema_version,
                    modify_time,
                )?;
                Some(format!("redo at {scn}"))
            }
            AdminCommand::Prepare { ls, tx, version } => {
                let scn = session.prepare(LsId::new(ls), TxId::new(tx), Scn::new(version))?;
                Some(format!("prepare log at {scn}"))
            }
            AdminCommand::Commit { ls, tx, version } => {
                let scn = session.commit(LsId::new(ls), TxId::new(tx), Scn::new(version))?;
                Some(format!("commit log at {scn}"))
            }
            AdminCommand::Abort { ls, tx } => {
                session.abort(LsId::new(ls), TxId::new(tx))?;
                None
            }
            AdminCommand::Release { ls, tx } => {
                session.release(LsId::new(ls), TxId::new(tx))?;
                None
            }
            AdminCommand::RecScn { ls } => Some(session.rec_scn(LsId::new(ls))?.to_string()),
            AdminCommand::RefreshAggre { ls } => {
                session.refresh_aggre(LsId::new(ls))?;
                None
            }
            AdminCommand::Flushed { ls } => {
                session.flushed(LsId::new(ls))?;
                None
            }
            AdminCommand::Ls => Some(mode.render(session.ls_stats().into_iter().map(LsRow::from))),
            AdminCommand::Tx { ls } => {
                let stats = session.tx_stats(ls.map(LsId::new))?;
                Some(mode.render(stats.into_iter().map(TxRow::from)))
            }
            AdminCommand::Locks { ls } => {
                let stats = session.lock_stats(LsId::new(ls))?;
                Some(mode.render(stats.into_iter().map(LockRow::from)))
            }
            AdminCommand::Dump { ls, tx } => Some(session.dump(LsId::new(ls), TxId::new(tx))?),
        };
        Ok(output)
    }
}
