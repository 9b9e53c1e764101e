use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::entities::Product;
use crate::executor::{ExecutionContext, ExecutionContextExt};
use crate::{TransactionError, TransactionResult};

use super::Repository;

#[derive(Debug, Clone)]
pub struct ProductRepository {
    context: Arc<dyn ExecutionContext>,
}

impl Repository for ProductRepository {
    fn bind(context: Arc<dyn ExecutionContext>) -> Self {
        Self { context }
    }
}

impl ProductRepository {
    pub async fn create(&self, product: &Product, cancel: &CancelSignal) -> TransactionResult<()> {
        self.context
            .execute(
                sqlx::query("INSERT INTO products (id, name, stock) VALUES ($1, $2, $3)")
                    .bind(product.id)
                    .bind(&product.name)
                    .bind(product.stock),
                cancel,
            )
            .await?;
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancelSignal,
    ) -> TransactionResult<Option<Product>> {
        self.context
            .fetch_optional_as(
                sqlx::query("SELECT id, name, stock FROM products WHERE id = $1").bind(id),
                cancel,
            )
            .await
    }

    pub async fn count(&self, cancel: &CancelSignal) -> TransactionResult<i64> {
        let row = self
            .context
            .fetch_one(sqlx::query("SELECT COUNT(*) AS count FROM products"), cancel)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Take `quantity` units out of stock.
    ///
    /// The stock check and the update are one statement, so two units of
    /// work cannot both pass the check on the same units. A product that is
    /// missing or short on stock matches no row and yields
    /// [`TransactionError::PreconditionFailed`].
    pub async fn decrement_stock(
        &self,
        id: Uuid,
        quantity: i32,
        cancel: &CancelSignal,
    ) -> TransactionResult<()> {
        if quantity <= 0 {
            return Err(TransactionError::PreconditionFailed(format!(
                "quantity must be positive, got {quantity}"
            )));
        }

        let affected = self
            .context
            .execute(
                sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
                    .bind(id)
                    .bind(quantity),
                cancel,
            )
            .await?;

        if affected == 0 {
            tracing::debug!(product_id = %id, quantity, "Stock decrement rejected");
            return Err(TransactionError::PreconditionFailed(format!(
                "product {id} is missing or has fewer than {quantity} units in stock"
            )));
        }
        Ok(())
    }
}
