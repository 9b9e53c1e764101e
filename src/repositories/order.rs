use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{FromRow, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::entities::Order;
use crate::executor::{ExecutionContext, ExecutionContextExt};
use crate::{TransactionError, TransactionResult};

use super::Repository;

#[derive(Debug, Clone)]
pub struct OrderRepository {
    context: Arc<dyn ExecutionContext>,
}

impl Repository for OrderRepository {
    fn bind(context: Arc<dyn ExecutionContext>) -> Self {
        Self { context }
    }
}

impl OrderRepository {
    pub async fn create(&self, order: &Order, cancel: &CancelSignal) -> TransactionResult<()> {
        self.context
            .execute(
                sqlx::query(
                    "INSERT INTO orders (id, user_id, product_id, quantity) VALUES ($1, $2, $3, $4)",
                )
                .bind(order.id)
                .bind(order.user_id)
                .bind(order.product_id)
                .bind(order.quantity),
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancelSignal,
    ) -> TransactionResult<Option<Order>> {
        self.context
            .fetch_optional_as(
                sqlx::query("SELECT id, user_id, product_id, quantity FROM orders WHERE id = $1")
                    .bind(id),
                cancel,
            )
            .await
    }

    pub async fn count(&self, cancel: &CancelSignal) -> TransactionResult<i64> {
        let row = self
            .context
            .fetch_one(sqlx::query("SELECT COUNT(*) AS count FROM orders"), cancel)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn count_for_product(
        &self,
        product_id: Uuid,
        cancel: &CancelSignal,
    ) -> TransactionResult<i64> {
        let row = self
            .context
            .fetch_one(
                sqlx::query("SELECT COUNT(*) AS count FROM orders WHERE product_id = $1")
                    .bind(product_id),
                cancel,
            )
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Stream a user's orders without buffering them.
    pub fn stream_for_user<'a>(
        &'a self,
        user_id: Uuid,
        cancel: &'a CancelSignal,
    ) -> BoxStream<'a, TransactionResult<Order>> {
        self.context
            .fetch(
                sqlx::query(
                    "SELECT id, user_id, product_id, quantity FROM orders WHERE user_id = $1 ORDER BY id",
                )
                .bind(user_id),
                cancel,
            )
            .map(|row| row.and_then(|row| Order::from_row(&row).map_err(TransactionError::from)))
            .boxed()
    }
}
