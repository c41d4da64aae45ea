use std::path::PathBuf;
use std::time::Duration;

use crate::{DEF_MAX_RETRIES, DEF_TIMEOUT_MS};

/// Timeout and retry policy for one transfer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Deadline for each wait on the peer.
    pub timeout: Duration,
    /// Consecutive timeouts tolerated before the transfer aborts.
    pub max_retries: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEF_TIMEOUT_MS),
            max_retries: DEF_MAX_RETRIES,
        }
    }
}

impl TransferConfig {
    pub fn new(timeout_ms: u64, max_retries: u8) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
            max_retries,
        }
    }
}

/// Responder-side settings shared by every worker the server spawns.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Directory requested files are resolved against.
    pub root: PathBuf,
    /// Files larger than this are refused with "allocation exceeded".
    pub max_file_size: Option<u64>,
    pub transfer: TransferConfig,
}

impl ServeConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: None,
            transfer: TransferConfig::default(),
        }
    }
}
