//! Error taxonomy for the node.
//!
//! Every error here is recovered inside the operating cycle. None of them is
//! allowed to escape `NodeController::run`; they surface as log lines, the
//! status indicator, or a forced state transition (rejoin, sentinel fix).

use thiserror::Error;

/// Failure reported by a hardware peripheral (UART, ADC, retention memory).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HalError {
    #[error("peripheral I/O failed: {0}")]
    Io(String),
    #[error("peripheral busy")]
    Busy,
}

/// Failure reported by the LoRaWAN stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("stack is busy with another operation")]
    Busy,
    #[error("no acknowledgment received for confirmed uplink")]
    NoAck,
    #[error("payload of {0} bytes exceeds the data rate limit")]
    PayloadTooLarge(usize),
    #[error("session state rejected by the stack")]
    InvalidSession,
    #[error("radio error: {0}")]
    Radio(String),
}

/// Join request could not be issued. Transient; the controller re-issues it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("join request failed: {0}")]
pub struct JoinFailed(#[from] pub StackError);

/// The satellite receiver produced no usable fix sentence within the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no fix after {attempts} reads")]
pub struct FixUnavailable {
    pub attempts: u32,
}

/// Uplink was not delivered. Deferred to the next scheduled wake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxFailed {
    #[error("session is not joined")]
    NotJoined,
    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Persisted session could not be used; forces a full rejoin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionCorrupt {
    #[error("no session record in retention memory")]
    Absent,
    #[error("record truncated ({0} bytes)")]
    Truncated(usize),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u8),
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("session marked as not joined")]
    NotJoined,
    #[error("retention read failed: {0}")]
    Read(#[from] HalError),
    #[error("stack refused session: {0}")]
    Rejected(StackError),
}

/// Session could not be written to retention memory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session blob of {0} bytes does not fit the record")]
    TooLarge(usize),
    #[error("retention write failed: {0}")]
    Write(#[from] HalError),
}

/// Telemetry payload could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("telemetry payload must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}
