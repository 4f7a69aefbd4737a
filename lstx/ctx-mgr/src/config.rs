use std::path::Path;
use std::time::Duration;

use lstx_transaction::{TxError, TxResult};
use serde::{Deserialize, Serialize};

/// Configuration of the transaction context manager of one log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsTxCtxMgrConfig {
    /// Number of lock stripes of the context directory
    pub ctx_map_bucket_count: usize,

    /// How long a role transition tries to take the write lock before logging
    /// and backing off (in microseconds)
    pub wlock_try_threshold_us: u64,

    /// Back-off between two write lock attempts (in microseconds)
    pub wlock_retry_interval_us: u64,

    /// How long a graceful revoke waits for a pending takeover or resume to
    /// resolve (in milliseconds)
    pub swl_cb_wait_timeout_ms: u64,

    /// Poll interval of that wait (in milliseconds)
    pub swl_cb_wait_interval_ms: u64,

    /// Bulk operations slower than this are logged (in milliseconds)
    pub slow_op_warn_threshold_ms: u64,

    /// Minimum interval between two statistics log lines (in milliseconds)
    pub stat_log_interval_ms: u64,

    /// Maximum number of contexts dumped by diagnostics
    pub max_print_tx_ctx: usize,
}

impl Default for LsTxCtxMgrConfig {
    fn default() -> Self {
        Self {
            ctx_map_bucket_count: 64,
            wlock_try_threshold_us: 100_000,
            wlock_retry_interval_us: 1_000,
            swl_cb_wait_timeout_ms: 100,
            swl_cb_wait_interval_ms: 10,
            slow_op_warn_threshold_ms: 3_000,
            stat_log_interval_ms: 10_000,
            max_print_tx_ctx: 32,
        }
    }
}

impl LsTxCtxMgrConfig {
    pub fn wlock_try_threshold(&self) -> Duration {
        Duration::from_micros(self.wlock_try_threshold_us)
    }

    pub fn wlock_retry_interval(&self) -> Duration {
        Duration::from_micros(self.wlock_retry_interval_us)
    }

    pub fn swl_cb_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.swl_cb_wait_timeout_ms)
    }

    pub fn swl_cb_wait_interval(&self) -> Duration {
        Duration::from_millis(self.swl_cb_wait_interval_ms)
    }

    pub fn slow_op_warn_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_op_warn_threshold_ms)
    }

    pub fn stat_log_interval(&self) -> Duration {
        Duration::from_millis(self.stat_log_interval_ms)
    }

    pub fn validate(&self) -> TxResult<()> {
        if self.ctx_map_bucket_count == 0 {
            return Err(TxError::InvalidArgument(
                "ctx_map_bucket_count must be positive".into(),
            ));
        }
        if self.wlock_try_threshold_us == 0 {
            return Err(TxError::InvalidArgument(
                "wlock_try_threshold_us must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the tenant-wide registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxCtxMgrConfig {
    /// Applied to every log stream of the tenant
    pub ls: LsTxCtxMgrConfig,

    /// Sleep between two drain checks of the tenant-wide wait (in milliseconds)
    pub wait_sleep_ms: u64,

    /// Number of drain checks of the tenant-wide wait
    pub wait_retry_count: usize,

    /// Sleep between two drain checks while removing a log stream (in
    /// milliseconds)
    pub remove_ls_sleep_ms: u64,

    /// Number of drain checks while removing a log stream
    pub remove_ls_max_retry: usize,

    /// Drain check at which the remaining contexts are killed
    pub remove_ls_force_kill_retry: usize,
}

impl Default for TxCtxMgrConfig {
    fn default() -> Self {
        Self {
            ls: LsTxCtxMgrConfig::default(),
            wait_sleep_ms: 100,
            wait_retry_count: 10,
            remove_ls_sleep_ms: 20,
            remove_ls_max_retry: 100,
            remove_ls_force_kill_retry: 50,
        }
    }
}

impl TxCtxMgrConfig {
    pub fn wait_sleep(&self) -> Duration {
        Duration::from_millis(self.wait_sleep_ms)
    }

    pub fn remove_ls_sleep(&self) -> Duration {
        Duration::from_millis(self.remove_ls_sleep_ms)
    }

    pub fn from_json(json: &str) -> TxResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TxError::InvalidArgument(format!("bad config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> TxResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TxError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> TxResult<()> {
        self.ls.validate()?;
        if self.remove_ls_force_kill_retry >= self.remove_ls_max_retry {
            return Err(TxError::InvalidArgument(
                "remove_ls_force_kill_retry must be below remove_ls_max_retry".into(),
            ));
        }
        Ok(())
    }
}
