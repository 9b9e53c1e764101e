use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::{TransactionError, TransactionResult};

/// The PostgreSQL pool every unit of work draws its connections from.
///
/// Sized from `[database]` settings; hand it to
/// [`crate::PostgresUnitOfWork::from_config`] to get a unit of work.
#[derive(Debug, Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    /// Connect eagerly; fails with [`TransactionError::StatementFailed`] when
    /// the server is unreachable.
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn new(config: &DatabaseConfig) -> TransactionResult<Self> {
        info!("Connecting unit of work pool");

        let pool = Self::options(config)
            .connect(&config.url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Unit of work pool could not connect");
                TransactionError::StatementFailed(e)
            })?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Unit of work pool ready"
        );

        Ok(Self { pool })
    }

    /// Build the pool without connecting; connections open on first use.
    pub fn new_lazy(config: &DatabaseConfig) -> TransactionResult<Self> {
        let pool = Self::options(config).connect_lazy(&config.url)?;
        Ok(Self { pool })
    }

    fn options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip `SELECT 1` through a pooled connection.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> TransactionResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Pool health check failed");
            TransactionError::StatementFailed(e)
        })?;

        tracing::debug!("Pool health check passed");
        Ok(())
    }

    /// Open connections, idle or checked out.
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    /// Wait for checked-out connections to return, then close them all.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        info!("Closing unit of work pool");
        self.pool.close().await;
        info!("Unit of work pool closed");
    }
}
