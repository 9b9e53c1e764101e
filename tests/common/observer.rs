use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use pg_unit_of_work::{TransactionAware, TransactionResult};

/// Records which terminal callbacks a session delivered.
#[derive(Default)]
pub struct RecordingObserver {
    committed: RwLock<Vec<Uuid>>,
    rolled_back: RwLock<Vec<Uuid>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_committed(&self) -> bool {
        !self.committed.read().is_empty()
    }

    pub fn is_rolled_back(&self) -> bool {
        !self.rolled_back.read().is_empty()
    }

    pub fn committed_units(&self) -> Vec<Uuid> {
        self.committed.read().clone()
    }
}

#[async_trait]
impl TransactionAware for RecordingObserver {
    async fn on_commit(&self, unit_of_work: Uuid) -> TransactionResult<()> {
        self.committed.write().push(unit_of_work);
        Ok(())
    }

    async fn on_rollback(&self, unit_of_work: Uuid) -> TransactionResult<()> {
        self.rolled_back.write().push(unit_of_work);
        Ok(())
    }
}
