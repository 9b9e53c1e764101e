//! Tables backing the bundled repositories.

use sqlx::PgPool;
use tracing::{info, instrument};

use crate::TransactionResult;

const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username VARCHAR(255) NOT NULL,
        email VARCHAR(255) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL,
        stock INTEGER NOT NULL CHECK (stock >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id),
        product_id UUID NOT NULL REFERENCES products(id),
        quantity INTEGER NOT NULL CHECK (quantity > 0)
    )
    "#,
];

const DROP_STATEMENTS: &[&str] = &[
    "DROP TABLE IF EXISTS orders CASCADE",
    "DROP TABLE IF EXISTS products CASCADE",
    "DROP TABLE IF EXISTS users CASCADE",
];

/// Create the `users`, `products` and `orders` tables if they are missing.
#[instrument(skip(pool))]
pub async fn create_schema(pool: &PgPool) -> TransactionResult<()> {
    let mut tx = pool.begin().await?;
    for statement in CREATE_STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!("Schema created");
    Ok(())
}

/// Drop every table created by [`create_schema`].
#[instrument(skip(pool))]
pub async fn drop_schema(pool: &PgPool) -> TransactionResult<()> {
    let mut tx = pool.begin().await?;
    for statement in DROP_STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!("Schema dropped");
    Ok(())
}
