//! Transfer status taxonomy
//!
//! One status set shared by Xfer streams, Transfer downloads, uploads, and
//! texture requests. Wire codes follow the protocol convention: zero is
//! in-progress, one is successful completion, negatives are failures.

/// Terminal and in-flight status of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TransferStatus {
    /// Transfer is healthy and in progress
    Ok = 0,
    /// Completed successfully
    Done = 1,
    /// Accepted but not yet started by the remote side
    Queued = 2,
    /// Cancelled, locally or by the remote side
    Aborted = -1,
    /// Remote side reports the asset does not exist
    NotFound = -2,
    /// Unspecified protocol or payload error
    Error = -3,
    InsufficientFunds = -4,
    /// No data within the allowed window
    Timeout = -5,
}

impl TransferStatus {
    pub fn from_code(code: i32) -> TransferStatus {
        match code {
            0 => TransferStatus::Ok,
            1 => TransferStatus::Done,
            2 => TransferStatus::Queued,
            -1 => TransferStatus::Aborted,
            -2 => TransferStatus::NotFound,
            -4 => TransferStatus::InsufficientFunds,
            -5 => TransferStatus::Timeout,
            _ => TransferStatus::Error,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether this status ends a transfer
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferStatus::Ok | TransferStatus::Queued)
    }

    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}
