use thiserror::Error;

use crate::types::{ShardId, TxnId};

/// Convenience alias for `Result<T, BridgeError>`.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`   — bad input, unsupported statement (4xx equivalent)
/// - `Retryable`   — compensation failure still inside the retry budget
/// - `Transient`   — timeout, backpressure; retried on a later pass
/// - `InternalBug` — registration/packaging defect; must be loud
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Classify for retry/escalation. Protocol and dispatch errors are never
    /// retried automatically; only recovery failures are, and only inside
    /// the bounded per-operation budget.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Protocol(_) => ErrorKind::UserError,
            BridgeError::Dispatch(e) => e.kind(),
            BridgeError::Recovery(e) => e.kind(),
            BridgeError::Internal(_) => ErrorKind::InternalBug,
        }
    }
}

/// Wire-protocol codec errors. Always fatal to the current packet: malformed
/// input is reported, never silently repaired.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Missing NUL terminator while reading string field")]
    UnterminatedString,

    #[error("Embedded NUL byte in null-terminated field '{field}'")]
    EmbeddedNul { field: &'static str },

    #[error("Unexpected packet header: 0x{actual:02x} (expected 0x{expected:02x})")]
    UnexpectedHeader { expected: u8, actual: u8 },

    #[error("Out-of-order packet: expected sequence {expected}, got {actual}")]
    OutOfOrderPacket { expected: u8, actual: u8 },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    #[error("Invalid UTF-8 in field '{field}'")]
    InvalidUtf8 {
        field: &'static str,
        source: std::string::FromUtf8Error,
    },

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Authentication failed for user '{user}'")]
    AuthFailed { user: String },

    #[error("Connection closed during handshake")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Statement dispatch errors.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The statement's exact type is registered nowhere. User-visible.
    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(&'static str),

    /// A fallback-table factory refused to construct its handler. This is a
    /// registration/packaging defect, not bad input.
    #[error("Handler not constructible: {0}")]
    HandlerNotConstructible(&'static str),

    /// A global-rule statement has no registered updater. Configuration
    /// defect surfaced loudly, never silently skipped.
    #[error("No global rule updater registered for statement: {0}")]
    MissingRuleUpdater(&'static str),

    /// A scaling statement was dispatched with no scaling backend wired in.
    #[error("No scaling job updater registered (statement: {0})")]
    MissingScalingUpdater(&'static str),

    #[error("Handler initialization failed: {0}")]
    Init(String),

    #[error("Handler execution failed: {0}")]
    Execution(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnsupportedStatement(_) => ErrorKind::UserError,
            DispatchError::HandlerNotConstructible(_) | DispatchError::MissingRuleUpdater(_) => {
                ErrorKind::InternalBug
            }
            DispatchError::MissingScalingUpdater(_) => ErrorKind::InternalBug,
            DispatchError::Init(_) | DispatchError::Execution(_) => ErrorKind::UserError,
        }
    }
}

/// Transaction recovery errors.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Transaction log store error: {0}")]
    Store(String),

    #[error("Unknown transaction in log store: {0}")]
    UnknownTransaction(TxnId),

    #[error("Unknown operation {op_id} in {txn_id}")]
    UnknownOperation { txn_id: TxnId, op_id: u32 },

    /// An update tried to move an operation backwards (e.g. away from
    /// `Committed`). Transitions are monotonic.
    #[error("Invalid status transition for {txn_id} op {op_id}: {from} -> {to}")]
    InvalidTransition {
        txn_id: TxnId,
        op_id: u32,
        from: &'static str,
        to: &'static str,
    },

    #[error("Compensation failed for {txn_id} op {op_id} against {shard}: {reason}")]
    Compensation {
        txn_id: TxnId,
        op_id: u32,
        shard: ShardId,
        reason: String,
    },

    #[error("Invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("Recovery job already scheduled: {0}")]
    JobAlreadyScheduled(String),
}

impl RecoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecoveryError::Compensation { .. } => ErrorKind::Retryable,
            RecoveryError::Store(_) => ErrorKind::Transient,
            RecoveryError::UnknownTransaction(_)
            | RecoveryError::UnknownOperation { .. }
            | RecoveryError::InvalidTransition { .. }
            | RecoveryError::InvalidCron { .. }
            | RecoveryError::JobAlreadyScheduled(_) => ErrorKind::InternalBug,
        }
    }
}
