//! Typed error kinds for the runtime core.
//!
//! Recoverable conditions are counted and logged at the point of occurrence; this
//! enum exists for callers that need to branch on *why* an operation failed, not as
//! a replacement for that counting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("queue full: capacity {capacity} exceeded")]
    QueueFull { capacity: usize },

    #[error("sequence gap: expected {expected}, got first_update_id {got}")]
    SequenceGap { expected: i64, got: i64 },

    #[error("stale delta: final_update_id {final_update_id} <= current sequence {current}")]
    StaleDelta { final_update_id: i64, current: i64 },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("snapshot fetch failed: {0}")]
    SnapshotFetchFailed(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("strategy error in {strategy_id}: {source}")]
    StrategyError {
        strategy_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
