use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::entities::User;
use crate::executor::{ExecutionContext, ExecutionContextExt};
use crate::TransactionResult;

use super::Repository;

#[derive(Debug, Clone)]
pub struct UserRepository {
    context: Arc<dyn ExecutionContext>,
}

impl Repository for UserRepository {
    fn bind(context: Arc<dyn ExecutionContext>) -> Self {
        Self { context }
    }
}

impl UserRepository {
    pub async fn create(&self, user: &User, cancel: &CancelSignal) -> TransactionResult<()> {
        self.context
            .execute(
                sqlx::query("INSERT INTO users (id, username, email) VALUES ($1, $2, $3)")
                    .bind(user.id)
                    .bind(&user.username)
                    .bind(&user.email),
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancelSignal,
    ) -> TransactionResult<Option<User>> {
        self.context
            .fetch_optional_as(
                sqlx::query("SELECT id, username, email FROM users WHERE id = $1").bind(id),
                cancel,
            )
            .await
    }

    pub async fn count(&self, cancel: &CancelSignal) -> TransactionResult<i64> {
        let row = self
            .context
            .fetch_one(sqlx::query("SELECT COUNT(*) AS count FROM users"), cancel)
            .await?;
        Ok(row.try_get("count")?)
    }
}
