use crate::cancel::CancelCause;
use crate::lifecycle::SessionState;

/// Errors surfaced by a unit of work, its execution context and the
/// repositories bound to it.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The store refused to open the transaction, or the signal fired first.
    #[error("Failed to begin transaction: {reason}")]
    BeginFailed {
        reason: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Statement failed: {0}")]
    StatementFailed(#[from] sqlx::Error),

    /// A guarded mutation matched no row. This is a business rejection, not
    /// a fault of the store.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The commit was sent but did not succeed. Whether the store applied
    /// it is unknown.
    #[error("Transaction commit failed, outcome unknown: {0}")]
    CommitFailed(#[source] sqlx::Error),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(#[source] sqlx::Error),

    #[error("Operation {0}")]
    Cancelled(CancelCause),

    /// The unit of work has been resolved; it and its repositories are no
    /// longer usable.
    #[error("Unit of work is closed ({0})")]
    Closed(SessionState),

    #[error("Cannot commit a unit of work that is {0}")]
    NotOpen(SessionState),

    /// A row stream still borrows the transaction. Drop the stream, then
    /// commit or roll back.
    #[error("Cannot commit while a row stream is reading from the transaction")]
    StreamActive,
}

/// Result type for unit-of-work operations
pub type TransactionResult<T> = Result<T, TransactionError>;

impl TransactionError {
    pub(crate) fn begin(source: sqlx::Error) -> Self {
        TransactionError::BeginFailed {
            reason: source.to_string(),
            source: Some(source),
        }
    }

    pub(crate) fn begin_cancelled(cause: CancelCause) -> Self {
        TransactionError::BeginFailed {
            reason: format!("signal fired before the transaction opened ({cause})"),
            source: None,
        }
    }

    /// Domain-level rejection the caller should report as a business
    /// outcome rather than a system fault.
    pub fn is_domain(&self) -> bool {
        matches!(self, TransactionError::PreconditionFailed(_))
    }

    /// The store may or may not hold the unit of work's writes.
    pub fn is_outcome_ambiguous(&self) -> bool {
        matches!(self, TransactionError::CommitFailed(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, TransactionError::Cancelled(_))
    }
}

impl From<CancelCause> for TransactionError {
    fn from(cause: CancelCause) -> Self {
        TransactionError::Cancelled(cause)
    }
}
