use async_trait::async_trait;
use uuid::Uuid;

use crate::TransactionResult;

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Components implementing this trait can be registered with a
/// UnitOfWorkSession to receive a callback once the session's terminal
/// action has been applied. Typical uses are publishing events only after
/// the data they describe is durable, or dropping cached reads made inside
/// a transaction that was rolled back.
///
/// The outcome is already decided when a callback runs. A callback error is
/// logged by the session and does not change what the caller is told.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after the session committed.
    async fn on_commit(&self, unit_of_work: Uuid) -> TransactionResult<()>;

    /// Called after an explicit rollback. Sessions dropped while open roll
    /// back without notifying observers.
    async fn on_rollback(&self, unit_of_work: Uuid) -> TransactionResult<()>;
}
