use std::io;

use thiserror::Error;

use crate::packet::ErrorCode;

/// Why a single transfer stopped short of completion.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no response for block #{block} after {retries} timeouts")]
    RetriesExhausted { block: u16, retries: u8 },

    #[error("peer sent error {code}: {msg}")]
    Peer { code: ErrorCode, msg: String },

    #[error("request refused with error {code}: {msg}")]
    Refused { code: ErrorCode, msg: String },

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("reading source failed: {0}")]
    Source(#[source] io::Error),

    #[error("writing sink failed: {0}")]
    Sink(#[source] io::Error),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// The ERROR message to send to the peer when aborting locally, if any.
    /// Errors that came from the peer, or were already reported, get none.
    pub fn courtesy_error(&self) -> Option<(ErrorCode, String)> {
        match self {
            TransferError::Peer { .. } | TransferError::Refused { .. } => None,
            TransferError::RetriesExhausted { .. } => {
                Some((ErrorCode::NotDefined, "Max retries reached".to_string()))
            }
            TransferError::Sink(_) => Some((
                ErrorCode::DiskFull,
                ErrorCode::DiskFull.default_message().to_string(),
            )),
            TransferError::Source(e) => Some((ErrorCode::NotDefined, format!("Read failed: {e}"))),
            TransferError::Transport(_) => Some((ErrorCode::NotDefined, "Transport failure".into())),
            TransferError::Cancelled => Some((ErrorCode::NotDefined, "Transfer cancelled".into())),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
